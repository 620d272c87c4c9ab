//! Scene Graph - Typed Banner Elements
//!
//! A scene is the contract handed to the renderer. Known element types are
//! typed; anything else is carried verbatim so the renderer still sees it.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

pub const DEFAULT_BACKGROUND: &str = "#ffffff";
pub const DEFAULT_DIMENSION: u32 = 1080;
/// Canvas format tag the renderer expects when the model leaves it out.
pub const DEFAULT_VERSION: &str = "5.3.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(default = "default_background")]
    pub background_color: String,
    #[serde(default = "default_dimension", deserialize_with = "dimension")]
    pub width: u32,
    #[serde(default = "default_dimension", deserialize_with = "dimension")]
    pub height: u32,
    pub objects: Vec<Element>,
    #[serde(default = "default_version")]
    pub version: Value,
}

fn default_background() -> String { DEFAULT_BACKGROUND.to_string() }
fn default_dimension() -> u32 { DEFAULT_DIMENSION }
fn default_version() -> Value { Value::from(DEFAULT_VERSION) }

/// Canvas sizes sometimes arrive as floats; round and clamp at zero.
fn dimension<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(de::Error::custom("canvas dimension must be finite"));
    }
    Ok(value.round().clamp(0.0, u32::MAX as f64) as u32)
}

/// Ids are strings on the wire, but models emit bare numbers often enough.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!("invalid element id: {}", other))),
    }
}

impl Scene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            background_color: default_background(),
            width,
            height,
            objects: vec![],
            version: default_version(),
        }
    }

    /// Index of the first element carrying `id`.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.objects.iter().position(|e| e.id() == id)
    }

    pub fn find(&self, id: &str) -> Option<&Element> {
        self.objects.iter().find(|e| e.id() == id)
    }

    pub fn text_elements(&self) -> impl Iterator<Item = &TextElement> {
        self.objects.iter().filter_map(Element::as_text)
    }
}

/// Axis-aligned placement, pixel units, anchored top-left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Geometry {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { top, left, width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundElement {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_align: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(rename = "fontURL", default, skip_serializing_if = "Option::is_none")]
    pub font_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageElement {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectElement {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ry: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleElement {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathElement {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(flatten)]
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,
}

/// Element types with a field whitelist. Unlisted fields are dropped on parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KnownElement {
    #[serde(rename = "svg")]
    Background(BackgroundElement),
    #[serde(rename = "text")]
    Text(TextElement),
    /// Wrapping text; same fields as `text`.
    #[serde(rename = "textbox")]
    Textbox(TextElement),
    #[serde(rename = "image")]
    Image(ImageElement),
    #[serde(rename = "rect")]
    Rect(RectElement),
    #[serde(rename = "circle")]
    Circle(CircleElement),
    #[serde(rename = "path")]
    Path(PathElement),
}

impl KnownElement {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Background(_) => "svg",
            Self::Text(_) => "text",
            Self::Textbox(_) => "textbox",
            Self::Image(_) => "image",
            Self::Rect(_) => "rect",
            Self::Circle(_) => "circle",
            Self::Path(_) => "path",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Background(e) => &e.id,
            Self::Text(e) | Self::Textbox(e) => &e.id,
            Self::Image(e) => &e.id,
            Self::Rect(e) => &e.id,
            Self::Circle(e) => &e.id,
            Self::Path(e) => &e.id,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        match self {
            Self::Background(e) => &e.geometry,
            Self::Text(e) | Self::Textbox(e) => &e.geometry,
            Self::Image(e) => &e.geometry,
            Self::Rect(e) => &e.geometry,
            Self::Circle(e) => &e.geometry,
            Self::Path(e) => &e.geometry,
        }
    }

    pub fn geometry_mut(&mut self) -> &mut Geometry {
        match self {
            Self::Background(e) => &mut e.geometry,
            Self::Text(e) | Self::Textbox(e) => &mut e.geometry,
            Self::Image(e) => &mut e.geometry,
            Self::Rect(e) => &mut e.geometry,
            Self::Circle(e) => &mut e.geometry,
            Self::Path(e) => &mut e.geometry,
        }
    }
}

/// Either a typed element or the raw JSON of one we don't model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementBody {
    Known(KnownElement),
    Unknown(Value),
}

/// What an element is for, decided once when the element is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    CallToAction,
    Content,
}

impl Role {
    /// Call-to-action parts are tagged by an id containing "cta".
    pub fn from_id(id: &str) -> Self {
        if id.to_lowercase().contains("cta") {
            Self::CallToAction
        } else {
            Self::Content
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    role: Role,
    body: ElementBody,
}

impl Element {
    pub fn new(body: ElementBody) -> Self {
        let role = match &body {
            ElementBody::Known(known) => Role::from_id(known.id()),
            ElementBody::Unknown(raw) => Role::from_id(raw_str(raw, "id").unwrap_or_default()),
        };
        Self { role, body }
    }

    pub fn known(element: KnownElement) -> Self {
        Self::new(ElementBody::Known(element))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn body(&self) -> &ElementBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ElementBody {
        &mut self.body
    }

    pub fn id(&self) -> &str {
        match &self.body {
            ElementBody::Known(known) => known.id(),
            ElementBody::Unknown(raw) => raw_str(raw, "id").unwrap_or_default(),
        }
    }

    /// Wire type string; empty when an unknown element has none.
    pub fn kind(&self) -> &str {
        match &self.body {
            ElementBody::Known(known) => known.kind(),
            ElementBody::Unknown(raw) => raw_str(raw, "type").unwrap_or_default(),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self.body, ElementBody::Known(_))
    }

    pub fn is_text_like(&self) -> bool {
        self.as_text().is_some()
    }

    /// `text` and `textbox` elements.
    pub fn as_text(&self) -> Option<&TextElement> {
        match &self.body {
            ElementBody::Known(KnownElement::Text(text) | KnownElement::Textbox(text)) => Some(text),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut TextElement> {
        match &mut self.body {
            ElementBody::Known(KnownElement::Text(text) | KnownElement::Textbox(text)) => Some(text),
            _ => None,
        }
    }

    /// Placement of the element. Unknown elements only report one when all
    /// four fields are numeric.
    pub fn geometry(&self) -> Option<Geometry> {
        match &self.body {
            ElementBody::Known(known) => Some(*known.geometry()),
            ElementBody::Unknown(raw) => Some(Geometry {
                top: raw.get("top")?.as_f64()?,
                left: raw.get("left")?.as_f64()?,
                width: raw.get("width")?.as_f64()?,
                height: raw.get("height")?.as_f64()?,
            }),
        }
    }

    pub fn set_origin(&mut self, left: f64, top: f64) {
        match &mut self.body {
            ElementBody::Known(known) => {
                let geometry = known.geometry_mut();
                geometry.left = left;
                geometry.top = top;
            }
            ElementBody::Unknown(Value::Object(map)) => {
                map.insert("left".to_string(), Value::from(left));
                map.insert("top".to_string(), Value::from(top));
            }
            ElementBody::Unknown(_) => {}
        }
    }

    /// Clamp a negative width or height to zero. Returns whether anything changed.
    pub fn clamp_size(&mut self) -> bool {
        match &mut self.body {
            ElementBody::Known(known) => {
                let geometry = known.geometry_mut();
                let negative = geometry.width < 0.0 || geometry.height < 0.0;
                geometry.width = geometry.width.max(0.0);
                geometry.height = geometry.height.max(0.0);
                negative
            }
            ElementBody::Unknown(Value::Object(map)) => {
                let mut changed = false;
                for key in ["width", "height"] {
                    if map.get(key).and_then(Value::as_f64).is_some_and(|v| v < 0.0) {
                        map.insert(key.to_string(), Value::from(0.0));
                        changed = true;
                    }
                }
                changed
            }
            ElementBody::Unknown(_) => false,
        }
    }
}

fn raw_str<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.as_object().and_then(|m: &Map<String, Value>| m.get(key)).and_then(Value::as_str)
}

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Element {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ElementBody::deserialize(deserializer).map(Element::new)
    }
}

impl From<KnownElement> for Element {
    fn from(element: KnownElement) -> Self {
        Element::known(element)
    }
}
