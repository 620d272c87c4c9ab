//! Raw Output Extractor - First Complete Scene Wins
//!
//! Model output repeats itself, trails off, or wraps the scene in prose.
//! Tiers, in order: direct brace match, repair collaborator, exhaustive scan.
//!
//! Brace matching skips `{`/`}` inside JSON string literals, so markup in a
//! `src` value cannot end a candidate early.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::normalize::{normalize_value, schema_hint, NormalizeError, NormalizeReport};
use crate::repair::TextRepairer;
use crate::scene::Scene;

pub const OPEN_MARKER: &str = "<json>";
pub const CLOSE_MARKER: &str = "</json>";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("No JSON object found")]
    NoObject,

    #[error("Unbalanced braces starting at byte {0}")]
    Unbalanced(usize),

    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    NotAScene(#[from] NormalizeError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    Direct,
    Repaired,
    Scanned,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub scene: Scene,
    pub report: NormalizeReport,
    pub tier: ExtractionTier,
}

/// The text between the first `<json>` and the following `</json>`, or to
/// the end when the close marker is missing. Without markers, all of it.
pub fn marked_region(raw: &str) -> &str {
    match raw.find(OPEN_MARKER) {
        Some(start) => {
            let body = &raw[start + OPEN_MARKER.len()..];
            match body.find(CLOSE_MARKER) {
                Some(end) => &body[..end],
                None => body,
            }
        }
        None => raw,
    }
}

/// Byte offset one past the `}` that closes the object opened at `start`.
pub fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// The first complete object in `text`; anything after it is ignored.
pub fn first_object(text: &str) -> Result<&str, ExtractError> {
    let start = text.find('{').ok_or(ExtractError::NoObject)?;
    let end = balanced_end(text, start).ok_or(ExtractError::Unbalanced(start))?;
    Ok(&text[start..end])
}

fn parse_scene(candidate: &str) -> Result<(Scene, NormalizeReport), ExtractError> {
    let value: Value = serde_json::from_str(candidate)?;
    Ok(normalize_value(value)?)
}

/// Marker region, first balanced object, parse, normalize.
pub fn extract_direct(raw: &str) -> Result<(Scene, NormalizeReport), ExtractError> {
    parse_scene(first_object(marked_region(raw))?)
}

/// Try every `{` in the text; the first candidate that is a scene wins.
pub fn scan_candidates(raw: &str) -> Option<(Scene, NormalizeReport)> {
    raw.match_indices('{').find_map(|(start, _)| {
        let end = balanced_end(raw, start)?;
        parse_scene(&raw[start..end]).ok()
    })
}

pub struct Extractor<R> {
    repairer: R,
}

impl<R: TextRepairer> Extractor<R> {
    pub fn new(repairer: R) -> Self {
        Self { repairer }
    }

    /// Recover one normalized scene from raw model text. `None` means every
    /// tier failed; this never errors.
    pub async fn extract(&self, raw: &str) -> Option<Extraction> {
        let direct_error = match extract_direct(raw) {
            Ok((scene, report)) => {
                return Some(Extraction { scene, report, tier: ExtractionTier::Direct });
            }
            Err(e) => e,
        };
        tracing::warn!(error = %direct_error, "direct extraction failed, asking repair service");

        match self.repairer.repair(raw, &schema_hint()).await {
            Ok(repaired) => match extract_direct(&repaired) {
                Ok((scene, report)) => {
                    tracing::info!("scene recovered by repair service");
                    return Some(Extraction { scene, report, tier: ExtractionTier::Repaired });
                }
                Err(e) => tracing::warn!(error = %e, "repaired text is still not a scene"),
            },
            Err(e) => tracing::warn!(error = %e, "repair service unavailable"),
        }

        if let Some((scene, report)) = scan_candidates(raw) {
            tracing::info!("scene recovered by exhaustive scan");
            return Some(Extraction { scene, report, tier: ExtractionTier::Scanned });
        }

        tracing::error!(len = raw.len(), "no scene could be extracted");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::{NoRepair, RepairError};

    const SCENE: &str = r##"{"backgroundColor": "#F5EEE8", "width": 1080, "height": 1080, "objects": [{"type": "text", "id": "heading", "text": "SALE", "left": 10, "top": 10, "width": 100, "height": 40}]}"##;

    struct FixedRepair(&'static str);

    impl TextRepairer for FixedRepair {
        async fn repair(&self, _raw: &str, _hint: &str) -> Result<String, RepairError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_marked_region_with_and_without_close() {
        assert_eq!(marked_region("x <json>{a}</json> y"), "{a}");
        assert_eq!(marked_region("x <json>{a} tail"), "{a} tail");
        assert_eq!(marked_region("plain"), "plain");
    }

    #[test]
    fn test_balanced_end_ignores_string_braces() {
        let text = r#"{"src": "<svg>}}{</svg>", "n": {"k": "\"}"}} trailing"#;
        let end = balanced_end(text, 0).unwrap();
        assert_eq!(&text[end..], " trailing");
    }

    #[test]
    fn test_balanced_end_unclosed() {
        assert_eq!(balanced_end(r#"{"a": {"b": 1}"#, 0), None);
        assert_eq!(balanced_end("abc", 0), None);
    }

    #[test]
    fn test_first_object_stops_at_first() {
        let doubled = format!("{}{}", SCENE, SCENE);
        assert_eq!(first_object(&doubled).unwrap(), SCENE);
    }

    #[test]
    fn test_direct_with_prose_and_markers() {
        let raw = format!("Here is the banner: <json>\n{}\n</json> hope it helps", SCENE);
        let (scene, _) = extract_direct(&raw).unwrap();
        assert_eq!(scene.background_color, "#F5EEE8");
        assert_eq!(scene.objects.len(), 1);
    }

    #[test]
    fn test_direct_rejects_document_without_objects() {
        assert!(matches!(
            extract_direct(r#"{"width": 10}"#),
            Err(ExtractError::NotAScene(_))
        ));
    }

    #[test]
    fn test_scan_skips_leading_junk_objects() {
        let raw = format!(r#"notes {{"step": 1}} then {{broken then {}"#, SCENE);
        let (scene, _) = scan_candidates(&raw).unwrap();
        assert_eq!(scene.objects[0].id(), "heading");
    }

    #[tokio::test]
    async fn test_tier_direct() {
        let extraction = Extractor::new(NoRepair).extract(SCENE).await.unwrap();
        assert_eq!(extraction.tier, ExtractionTier::Direct);
    }

    #[tokio::test]
    async fn test_tier_repaired() {
        let repair = FixedRepair(r#"<json>{"objects": []}</json>"#);
        let extraction = Extractor::new(repair).extract(r#"{"objects": [ {"#).await.unwrap();
        assert_eq!(extraction.tier, ExtractionTier::Repaired);
        assert!(extraction.scene.objects.is_empty());
    }

    #[tokio::test]
    async fn test_tier_scanned_when_repair_fails() {
        let raw = format!(r#"{{"meta": {} "#, SCENE);
        let extraction = Extractor::new(NoRepair).extract(&raw).await.unwrap();
        assert_eq!(extraction.tier, ExtractionTier::Scanned);
    }

    #[tokio::test]
    async fn test_mistyped_canvas_fields_still_extract() {
        let raw = r#"{"width": "1080", "height": 1080, "objects": [{"type": "rect", "id": "box", "left": 0, "top": 0, "width": 10, "height": 10}]}"#;
        let extraction = Extractor::new(NoRepair).extract(raw).await.unwrap();
        assert_eq!(extraction.tier, ExtractionTier::Direct);
        assert_eq!(extraction.scene.width, 1080);
        assert_eq!(extraction.report.notes.len(), 1);

        let extraction = Extractor::new(NoRepair)
            .extract(r#"<json>{"backgroundColor": null, "objects": []}</json>"#)
            .await
            .unwrap();
        assert_eq!(extraction.scene.background_color, "#ffffff");
        assert!(extraction.report.has_warnings());
    }

    #[tokio::test]
    async fn test_no_result() {
        assert!(Extractor::new(NoRepair).extract("no json here {").await.is_none());
    }
}
