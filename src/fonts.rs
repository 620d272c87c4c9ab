//! Font Cache and Catalog
//!
//! The cache is a process-scoped directory keyed by file name. Nothing is
//! ever evicted; a cached file is trusted as-is.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::scene::Scene;

#[derive(Debug, Error)]
pub enum FontFetchError {
    #[error("Font URL has no file name: {0}")]
    InvalidUrl(String),

    #[error("Font download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Font server returned HTTP {0}")]
    Status(u16),

    #[error("Font cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct FontCache {
    dir: PathBuf,
    client: reqwest::Client,
}

impl FontCache {
    /// Create the cache directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, FontFetchError> {
        Self::with_client(dir, reqwest::Client::new())
    }

    pub fn with_client(dir: impl Into<PathBuf>, client: reqwest::Client) -> Result<Self, FontFetchError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, client })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for a font URL: its last path segment.
    pub fn file_name(url: &str) -> Result<String, FontFetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|_| FontFetchError::InvalidUrl(url.to_string()))?;
        parsed
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .map(str::to_string)
            .ok_or_else(|| FontFetchError::InvalidUrl(url.to_string()))
    }

    pub fn cached_path(&self, url: &str) -> Result<PathBuf, FontFetchError> {
        Ok(self.dir.join(Self::file_name(url)?))
    }

    /// Local path of the font, downloading it on first use.
    ///
    /// Bytes land in a uniquely named temp file and are renamed into place,
    /// so two writers racing on the same font both leave a whole file.
    pub async fn ensure(&self, url: &str) -> Result<PathBuf, FontFetchError> {
        let path = self.cached_path(url)?;
        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(path = %path.display(), "font cache hit");
            return Ok(path);
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FontFetchError::Status(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;

        let partial = self.dir.join(format!(".{}.part", Uuid::new_v4()));
        tokio::fs::write(&partial, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        tracing::info!(url, bytes = bytes.len(), "font cached");
        Ok(path)
    }
}

/// Font family name to downloadable font URL.
#[derive(Debug, Clone, Default)]
pub struct FontCatalog {
    fonts: HashMap<String, String>,
}

impl FontCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a flat `{family: url}` object, or one grouped by script
    /// (`{"english": {family: url}}`). Non-string entries are skipped.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let root = value
            .as_object()
            .ok_or_else(|| ConfigError::Invalid("font catalog must be a JSON object".into()))?;

        let mut catalog = Self::new();
        for (key, entry) in root {
            match entry {
                Value::String(url) => catalog.insert(key, url),
                Value::Object(group) => {
                    for (family, url) in group {
                        if let Some(url) = url.as_str() {
                            catalog.insert(family, url);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(catalog)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        Self::from_value(&value)
    }

    pub fn insert(&mut self, family: &str, url: &str) {
        self.fonts.insert(family.to_string(), url.to_string());
    }

    pub fn url_for(&self, family: &str) -> Option<&str> {
        self.fonts.get(family).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    /// Fill in `fontURL` on text elements that name a catalogued family
    /// but carry no URL. Returns how many were filled.
    pub fn attach_font_urls(&self, scene: &mut Scene) -> usize {
        let mut attached = 0;
        for text in scene.objects.iter_mut().filter_map(|e| e.as_text_mut()) {
            if text.font_url.is_some() {
                continue;
            }
            let Some(family) = text.font_family.as_deref() else { continue };
            match self.url_for(family) {
                Some(url) => {
                    text.font_url = Some(url.to_string());
                    attached += 1;
                }
                None => tracing::warn!(id = %text.id, family, "font family not in catalog"),
            }
        }
        attached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Element, Geometry, KnownElement, TextElement};
    use serde_json::json;

    fn text(id: &str, family: &str, url: Option<&str>) -> Element {
        Element::known(KnownElement::Text(TextElement {
            id: id.into(),
            geometry: Geometry::default(),
            fill: None,
            text: "x".into(),
            font_family: Some(family.into()),
            text_align: None,
            font_size: None,
            font_url: url.map(String::from),
        }))
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            FontCache::file_name("https://cdn.example.com/fonts/font/Bold-cc87.ttf?v=2").unwrap(),
            "Bold-cc87.ttf"
        );
        assert!(FontCache::file_name("https://cdn.example.com/").is_err());
        assert!(FontCache::file_name("not a url").is_err());
    }

    #[tokio::test]
    async fn test_cached_font_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FontCache::open(dir.path().join("fonts")).unwrap();
        let url = "http://127.0.0.1:9/fonts/Lexend.ttf";
        let expected = cache.cached_path(url).unwrap();
        std::fs::write(&expected, b"font bytes").unwrap();

        // Port 9 would refuse; a hit must never touch the network.
        let path = cache.ensure(url).await.unwrap();
        assert_eq!(path, expected);
    }

    #[tokio::test]
    async fn test_unreachable_font_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FontCache::open(dir.path()).unwrap();
        assert!(cache.ensure("http://127.0.0.1:9/fonts/Missing.ttf").await.is_err());
        assert!(!dir.path().join("Missing.ttf").exists());
    }

    #[test]
    fn test_catalog_grouped_and_flat() {
        let catalog = FontCatalog::from_value(&json!({
            "english": {"Lexend Bold": "https://f/lexend.ttf", "Broken": 3},
            "Orbitron Bold": "https://f/orbitron.ttf"
        })).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.url_for("Lexend Bold"), Some("https://f/lexend.ttf"));
        assert_eq!(catalog.url_for("Orbitron Bold"), Some("https://f/orbitron.ttf"));
        assert!(FontCatalog::from_value(&json!([1])).is_err());
    }

    #[test]
    fn test_attach_font_urls() {
        let mut catalog = FontCatalog::new();
        catalog.insert("Lexend", "https://f/lexend.ttf");

        let mut scene = Scene::new(1080, 1080);
        scene.objects = vec![
            text("a", "Lexend", None),
            text("b", "Lexend", Some("https://f/custom.ttf")),
            text("c", "Unknown Sans", None),
        ];

        assert_eq!(catalog.attach_font_urls(&mut scene), 1);
        assert_eq!(scene.objects[0].as_text().unwrap().font_url.as_deref(), Some("https://f/lexend.ttf"));
        assert_eq!(scene.objects[1].as_text().unwrap().font_url.as_deref(), Some("https://f/custom.ttf"));
        assert!(scene.objects[2].as_text().unwrap().font_url.is_none());
    }

    #[test]
    fn test_attach_font_urls_to_textbox() {
        let mut catalog = FontCatalog::new();
        catalog.insert("Lexend", "https://f/lexend.ttf");

        let mut scene = Scene::new(1080, 1080);
        scene.objects = vec![serde_json::from_value(json!({
            "type": "textbox", "id": "body", "text": "Soft band", "fontFamily": "Lexend"
        })).unwrap()];

        assert_eq!(catalog.attach_font_urls(&mut scene), 1);
        assert_eq!(scene.objects[0].as_text().unwrap().font_url.as_deref(), Some("https://f/lexend.ttf"));
    }
}
