//! Text Metrics Reconciler
//!
//! The model's text boxes are placement intent. After fonts are fetched and
//! each text element measured, the measured size replaces the ideal one and
//! the horizontal anchor implied by the alignment is preserved.
//!
//! Workers never touch the scene. Each returns `(id, outcome)` and the
//! coordinator applies outcomes by id once all of them are in.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::fonts::FontCache;
use crate::measure::{MeasureRequest, Measurement, MeasurementEngine};
use crate::scene::{Geometry, Scene, TextElement};

pub const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    /// Missing alignment means left; anything unrecognized is `None`.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("left") => Some(Self::Left),
            Some("center") => Some(Self::Center),
            Some("right") => Some(Self::Right),
            Some(_) => None,
        }
    }
}

/// Measured size and vertical position, with the horizontal anchor of the
/// ideal box kept according to `alignment`.
pub fn reconcile_geometry(ideal: Geometry, alignment: Alignment, measured: &Measurement) -> Geometry {
    let left = match alignment {
        Alignment::Left => ideal.left,
        Alignment::Center => ideal.center().0 - measured.width / 2.0,
        Alignment::Right => ideal.left - (measured.width - ideal.width),
    };
    Geometry {
        top: measured.top,
        left,
        width: measured.width,
        height: measured.height,
    }
}

/// Why one text element kept its ideal geometry.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ElementFailure {
    #[error("font fetch failed: {0}")]
    FontFetch(String),

    #[error("measurement failed: {0}")]
    Measurement(String),

    #[error("measurement timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementIssue {
    pub element_id: String,
    pub failure: ElementFailure,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub measured: Vec<String>,
    pub failures: Vec<ElementIssue>,
    /// Text elements left alone because their alignment is not left/center/right.
    pub unsupported_alignment: Vec<String>,
    /// Later occurrences of an id already measured earlier in the scene.
    pub duplicate_ids: Vec<String>,
}

type FontTable = HashMap<String, Result<PathBuf, String>>;

pub struct Reconciler<M> {
    engine: M,
    fonts: FontCache,
    concurrency: usize,
    font_timeout: Duration,
    measure_timeout: Duration,
}

impl<M: MeasurementEngine> Reconciler<M> {
    pub fn new(engine: M, fonts: FontCache) -> Self {
        Self {
            engine,
            fonts,
            concurrency: DEFAULT_CONCURRENCY,
            font_timeout: DEFAULT_TIMEOUT,
            measure_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(engine: M, fonts: FontCache, config: &PipelineConfig) -> Self {
        Self::new(engine, fonts)
            .with_concurrency(config.concurrency)
            .with_timeouts(config.font_timeout(), config.measure_timeout())
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeouts(mut self, font: Duration, measure: Duration) -> Self {
        self.font_timeout = font;
        self.measure_timeout = measure;
        self
    }

    pub fn engine(&self) -> &M {
        &self.engine
    }

    /// Measure every text element and write the results back.
    ///
    /// Failures stay with their element; siblings are unaffected.
    pub async fn reconcile(&self, scene: &mut Scene) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut jobs: Vec<TextElement> = vec![];

        for (position, element) in scene.objects.iter().enumerate() {
            let Some(text) = element.as_text() else { continue };
            if index.contains_key(&text.id) {
                tracing::warn!(id = %text.id, "duplicate text id, only the first is measured");
                report.duplicate_ids.push(text.id.clone());
                continue;
            }
            index.insert(text.id.clone(), position);
            if Alignment::parse(text.text_align.as_deref()).is_none() {
                tracing::warn!(id = %text.id, align = ?text.text_align, "unsupported alignment, geometry kept");
                report.unsupported_alignment.push(text.id.clone());
                continue;
            }
            jobs.push(text.clone());
        }

        if jobs.is_empty() {
            return report;
        }
        tracing::info!(texts = jobs.len(), concurrency = self.concurrency, "reconciling text metrics");

        let fonts = self.fetch_fonts(&jobs).await;
        let fonts = &fonts;
        let outcomes: Vec<(String, Result<Measurement, ElementFailure>)> = stream::iter(jobs.iter())
            .map(move |text| async move { (text.id.clone(), self.measure_text(text, fonts).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            let Some(text) = index.get(&id).and_then(|&pos| scene.objects[pos].as_text_mut()) else {
                continue;
            };
            match outcome {
                Ok(measured) => {
                    apply_measurement(text, &measured);
                    report.measured.push(id);
                }
                Err(failure) => {
                    tracing::warn!(id = %id, error = %failure, "keeping ideal geometry");
                    report.failures.push(ElementIssue { element_id: id, failure });
                }
            }
        }
        report
    }

    /// Each distinct font file is fetched once, keyed by file name.
    async fn fetch_fonts(&self, jobs: &[TextElement]) -> FontTable {
        let mut wanted: HashMap<String, String> = HashMap::new();
        for url in jobs.iter().filter_map(|t| t.font_url.as_deref()) {
            if let Ok(name) = FontCache::file_name(url) {
                wanted.entry(name).or_insert_with(|| url.to_string());
            }
        }

        stream::iter(wanted)
            .map(move |(name, url)| async move {
                let fetched = match tokio::time::timeout(self.font_timeout, self.fonts.ensure(&url)).await {
                    Ok(Ok(path)) => Ok(path),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {:?}", self.font_timeout)),
                };
                if let Err(e) = &fetched {
                    tracing::warn!(url = %url, error = %e, "font fetch failed");
                }
                (name, fetched)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn measure_text(&self, text: &TextElement, fonts: &FontTable) -> Result<Measurement, ElementFailure> {
        let font_path = match text.font_url.as_deref() {
            Some(url) => Some(font_path(url, fonts)?),
            None => None,
        };

        let request = MeasureRequest::for_text(text, font_path);
        match tokio::time::timeout(self.measure_timeout, self.engine.measure(&request)).await {
            Ok(Ok(measured)) => Ok(measured),
            Ok(Err(e)) => Err(ElementFailure::Measurement(e.to_string())),
            Err(_) => Err(ElementFailure::Timeout(self.measure_timeout)),
        }
    }
}

fn font_path(url: &str, fonts: &FontTable) -> Result<PathBuf, ElementFailure> {
    let name = FontCache::file_name(url).map_err(|e| ElementFailure::FontFetch(e.to_string()))?;
    match fonts.get(&name) {
        Some(Ok(path)) => Ok(path.clone()),
        Some(Err(e)) => Err(ElementFailure::FontFetch(e.clone())),
        None => Err(ElementFailure::FontFetch(format!("{} was never fetched", name))),
    }
}

fn apply_measurement(text: &mut TextElement, measured: &Measurement) {
    // Jobs are only created for parseable alignments.
    let alignment = Alignment::parse(text.text_align.as_deref()).unwrap_or(Alignment::Left);
    text.geometry = reconcile_geometry(text.geometry, alignment, measured);
    text.font_size = Some(measured.font_size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::MeasureError;
    use crate::scene::{Element, KnownElement};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn measured(width: f64) -> Measurement {
        Measurement { left: 0.0, top: 12.0, width, height: 30.0, font_size: 48.0 }
    }

    fn text(id: &str, align: Option<&str>, font_url: Option<&str>) -> Element {
        Element::known(KnownElement::Text(TextElement {
            id: id.into(),
            geometry: Geometry::new(100.0, 10.0, 200.0, 40.0),
            fill: None,
            text: id.to_uppercase(),
            font_family: Some("Lexend".into()),
            text_align: align.map(String::from),
            font_size: None,
            font_url: font_url.map(String::from),
        }))
    }

    /// Width 150 for everything; text "FAIL" errors, "SLOW" hangs.
    #[derive(Default)]
    struct FakeEngine {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MeasurementEngine for FakeEngine {
        async fn measure(&self, request: &MeasureRequest) -> Result<Measurement, MeasureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = if request.text == "SLOW" { 5_000 } else { 20 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if request.text == "FAIL" {
                return Err(MeasureError::Invalid("engine crashed".into()));
            }
            Ok(measured(150.0))
        }
    }

    fn reconciler(dir: &tempfile::TempDir) -> Reconciler<FakeEngine> {
        Reconciler::new(FakeEngine::default(), FontCache::open(dir.path()).unwrap())
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(200))
    }

    fn geometry_of(scene: &Scene, id: &str) -> Geometry {
        scene.find(id).and_then(Element::geometry).unwrap()
    }

    #[test]
    fn test_center_keeps_center() {
        let ideal = Geometry::new(100.0, 10.0, 200.0, 40.0);
        let out = reconcile_geometry(ideal, Alignment::Center, &measured(150.0));
        assert_eq!(out.left, 125.0);
        assert_eq!(out.center().0, 200.0);
        assert_eq!((out.top, out.width, out.height), (12.0, 150.0, 30.0));
    }

    #[test]
    fn test_right_keeps_right_edge() {
        let ideal = Geometry::new(100.0, 10.0, 200.0, 40.0);
        let out = reconcile_geometry(ideal, Alignment::Right, &measured(150.0));
        assert_eq!(out.left, 150.0);
        assert_eq!(out.right(), 300.0);
    }

    #[test]
    fn test_left_keeps_left() {
        let ideal = Geometry::new(100.0, 10.0, 200.0, 40.0);
        let out = reconcile_geometry(ideal, Alignment::Left, &measured(260.0));
        assert_eq!(out.left, 100.0);
        assert_eq!(out.width, 260.0);
    }

    #[test]
    fn test_alignment_parse() {
        assert_eq!(Alignment::parse(None), Some(Alignment::Left));
        assert_eq!(Alignment::parse(Some("center")), Some(Alignment::Center));
        assert_eq!(Alignment::parse(Some("justify")), None);
    }

    #[tokio::test]
    async fn test_sibling_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler(&dir);

        let mut scene = Scene::new(1080, 1080);
        scene.objects = vec![
            text("ok", Some("center"), None),
            text("fail", Some("left"), None),
            text("slow", Some("right"), None),
        ];

        let report = reconciler.reconcile(&mut scene).await;

        assert_eq!(report.measured, vec!["ok".to_string()]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(geometry_of(&scene, "ok").left, 125.0);
        assert_eq!(geometry_of(&scene, "fail"), Geometry::new(100.0, 10.0, 200.0, 40.0));
        assert_eq!(geometry_of(&scene, "slow"), Geometry::new(100.0, 10.0, 200.0, 40.0));

        let slow = report.failures.iter().find(|i| i.element_id == "slow").unwrap();
        assert!(matches!(slow.failure, ElementFailure::Timeout(_)));
        assert_eq!(scene.find("ok").unwrap().as_text().unwrap().font_size, Some(48.0));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler(&dir).with_concurrency(2);

        let mut scene = Scene::new(1080, 1080);
        scene.objects = (0..6).map(|i| text(&format!("t{}", i), None, None)).collect();

        let report = reconciler.reconcile(&mut scene).await;
        assert_eq!(report.measured.len(), 6);
        assert!(reconciler.engine().peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_duplicate_and_unsupported_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler(&dir);

        let mut scene = Scene::new(1080, 1080);
        scene.objects = vec![
            text("a", None, None),
            text("a", None, None),
            text("j", Some("justify"), None),
        ];

        let report = reconciler.reconcile(&mut scene).await;
        assert_eq!(reconciler.engine().calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.duplicate_ids, vec!["a".to_string()]);
        assert_eq!(report.unsupported_alignment, vec!["j".to_string()]);
        assert_eq!(scene.objects[1].geometry().unwrap().width, 200.0);
        assert_eq!(scene.objects[0].geometry().unwrap().width, 150.0);
    }

    #[tokio::test]
    async fn test_font_failure_keeps_ideal_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler(&dir);
        std::fs::write(dir.path().join("Cached.ttf"), b"ttf").unwrap();

        let mut scene = Scene::new(1080, 1080);
        scene.objects = vec![
            text("cached", None, Some("http://127.0.0.1:9/fonts/Cached.ttf")),
            text("nameless", None, Some("http://127.0.0.1:9/")),
        ];

        let report = reconciler.reconcile(&mut scene).await;
        assert_eq!(report.measured, vec!["cached".to_string()]);
        assert!(matches!(report.failures[0].failure, ElementFailure::FontFetch(_)));
        assert_eq!(reconciler.engine().calls.load(Ordering::SeqCst), 1);
    }

    /// Local font host answering every request with a tiny body; counts requests.
    async fn font_server() -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    loop {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nFONT")
                        .await;
                });
            }
        });
        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_shared_font_downloaded_once() {
        let (base, hits) = font_server().await;
        let url = format!("{}/fonts/Shared-Bold.ttf", base);
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler(&dir);

        let mut scene = Scene::new(1080, 1080);
        scene.objects = vec![
            text("a", None, Some(&url)),
            text("b", Some("center"), Some(&url)),
            text("c", Some("right"), Some(&url)),
        ];

        let report = reconciler.reconcile(&mut scene).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(report.failures.is_empty());
        assert_eq!(report.measured.len(), 3);
        assert_eq!(std::fs::read(dir.path().join("Shared-Bold.ttf")).unwrap(), b"FONT");
    }

    #[tokio::test]
    async fn test_textbox_is_measured() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler(&dir);

        let mut scene = Scene::new(1080, 1080);
        scene.objects = vec![serde_json::from_value(json!({
            "type": "textbox", "id": "body", "text": "Soft leather band", "textAlign": "center",
            "left": 100, "top": 10, "width": 300, "height": 40
        }))
        .unwrap()];

        let report = reconciler.reconcile(&mut scene).await;

        assert_eq!(report.measured, vec!["body".to_string()]);
        let body = geometry_of(&scene, "body");
        assert_eq!((body.left, body.width), (175.0, 150.0));
        assert_eq!(scene.objects[0].as_text().unwrap().font_size, Some(48.0));
        assert_eq!(scene.objects[0].kind(), "textbox");
    }
}
