//! Schema Normalizer - Whitelist Per Element Type
//!
//! Typed parsing is the whitelist: fields a type does not declare are
//! dropped. Everything the normalizer notices is reported, never raised.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::scene::{Element, Scene, DEFAULT_BACKGROUND, DEFAULT_DIMENSION};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static NORMALIZE_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_normalize_call_count() -> u32 {
    NORMALIZE_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_normalize_call_count() {
    NORMALIZE_CALL_COUNT.store(0, Ordering::SeqCst);
}

/// Fields each known type keeps besides `id` and `type`.
pub const FIELD_WHITELIST: &[(&str, &[&str])] = &[
    ("svg", &["top", "left", "width", "height", "src"]),
    ("text", &["top", "left", "width", "height", "fill", "text", "fontFamily", "textAlign", "fontSize", "fontURL"]),
    ("textbox", &["top", "left", "width", "height", "fill", "text", "fontFamily", "textAlign", "fontSize", "fontURL"]),
    ("image", &["top", "left", "width", "height", "src"]),
    ("rect", &["top", "left", "width", "height", "fill", "rx", "ry"]),
    ("circle", &["top", "left", "width", "height", "fill", "radius"]),
    ("path", &["top", "left", "width", "height", "fill", "path"]),
];

pub fn is_known_kind(kind: &str) -> bool {
    FIELD_WHITELIST.iter().any(|(k, _)| *k == kind)
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Document is not a JSON object")]
    NotAnObject,

    #[error("Document has no objects array")]
    MissingObjects,

    #[error("Document is not a scene: {0}")]
    NotAScene(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteSeverity {
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeNote {
    pub element_id: String,
    pub element_type: String,
    pub severity: NoteSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub notes: Vec<NormalizeNote>,
}

impl NormalizeReport {
    pub fn has_warnings(&self) -> bool {
        self.notes.iter().any(|n| n.severity == NoteSeverity::Warning)
    }
}

/// Parse a JSON document into a whitelisted scene.
///
/// Fails only when the document is not an object with an `objects` array.
/// Mistyped canvas fields fall back to defaults; every repair becomes a note.
pub fn normalize_value(mut value: Value) -> Result<(Scene, NormalizeReport), NormalizeError> {
    #[cfg(feature = "test-hooks")]
    NORMALIZE_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

    let mut report = NormalizeReport::default();
    let Value::Object(map) = &mut value else {
        return Err(NormalizeError::NotAnObject);
    };
    if !matches!(map.get("objects"), Some(Value::Array(_))) {
        return Err(NormalizeError::MissingObjects);
    }
    repair_canvas(map, &mut report);

    let mut scene: Scene = serde_json::from_value(value)?;
    for element in scene.objects.iter_mut() {
        if element.clamp_size() {
            report.notes.push(NormalizeNote {
                element_id: element.id().to_string(),
                element_type: element.kind().to_string(),
                severity: NoteSeverity::Warning,
                message: "negative width or height clamped to 0".to_string(),
            });
        }
    }
    inspect(&scene, &mut report);
    Ok((scene, report))
}

/// Run an existing scene back through the whitelist.
pub fn normalize_scene(scene: &Scene) -> Result<(Scene, NormalizeReport), NormalizeError> {
    normalize_value(serde_json::to_value(scene)?)
}

fn scene_note(severity: NoteSeverity, message: String) -> NormalizeNote {
    NormalizeNote {
        element_id: String::new(),
        element_type: "scene".to_string(),
        severity,
        message,
    }
}

/// Replace mistyped canvas fields before typed parsing sees them.
fn repair_canvas(map: &mut Map<String, Value>, report: &mut NormalizeReport) {
    match map.get("backgroundColor") {
        None | Some(Value::String(_)) => {}
        Some(other) => {
            report.notes.push(scene_note(
                NoteSeverity::Warning,
                format!("backgroundColor {} is not a string; using {}", other, DEFAULT_BACKGROUND),
            ));
            map.remove("backgroundColor");
        }
    }

    for key in ["width", "height"] {
        let parsed = match map.get(key) {
            None => continue,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(_) => None,
        };
        match parsed.filter(|v| v.is_finite()) {
            Some(v) if map.get(key).is_some_and(Value::is_number) => {
                if v < 0.0 {
                    report.notes.push(scene_note(NoteSeverity::Warning, format!("{} {} clamped to 0", key, v)));
                }
            }
            Some(v) => {
                report.notes.push(scene_note(NoteSeverity::Info, format!("{} given as a string; read as {}", key, v)));
                map.insert(key.to_string(), Value::from(v));
            }
            None => {
                report.notes.push(scene_note(
                    NoteSeverity::Warning,
                    format!("{} is not a number; using {}", key, DEFAULT_DIMENSION),
                ));
                map.remove(key);
            }
        }
    }

    if map.get("version").is_some_and(Value::is_null) {
        map.remove("version");
    }
}

fn inspect(scene: &Scene, report: &mut NormalizeReport) {
    for element in scene.objects.iter().filter(|e| !e.is_known()) {
        report.notes.push(note_for_passthrough(element));
    }
    for note in &report.notes {
        tracing::debug!(id = %note.element_id, kind = %note.element_type, "{}", note.message);
    }
}

fn note_for_passthrough(element: &Element) -> NormalizeNote {
    let kind = element.kind().to_string();
    let (severity, message) = if is_known_kind(&kind) {
        (
            NoteSeverity::Warning,
            format!("'{}' element has malformed fields; passed through unfiltered", kind),
        )
    } else {
        (
            NoteSeverity::Info,
            format!("unrecognized element type '{}'; passed through unchanged", kind),
        )
    };
    NormalizeNote {
        element_id: element.id().to_string(),
        element_type: kind,
        severity,
        message,
    }
}

/// Human-readable schema for the repair collaborator's prompt.
pub fn schema_hint() -> String {
    let mut lines = vec![
        "Top level: backgroundColor (hex string), width (int), height (int), objects (array).".to_string(),
        "Each object keeps only these fields:".to_string(),
    ];
    for (kind, fields) in FIELD_WHITELIST {
        lines.push(format!("   - {}: {}, id", kind, fields.join(", ")));
    }
    lines.join("\n")
}
