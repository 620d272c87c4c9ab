//! BannerLayout Core - Layout Resolution & Repair
//!
//! # Ground Rules
//! 1. The first complete scene in the model output wins
//! 2. Only whitelisted fields reach the renderer
//! 3. Font metrics come from the measurement engine, never from guesses
//! 4. One element failing never takes its siblings down
//! 5. An empty crop is an error, not the original image

pub mod scene;
pub mod normalize;
pub mod repair;
pub mod extract;
pub mod config;
pub mod fonts;
pub mod expand;
pub mod measure;
pub mod reconcile;
pub mod cta;
pub mod bbox;
pub mod hashing;
pub mod pipeline;

pub use scene::{Element, ElementBody, Geometry, KnownElement, Role, Scene, TextElement};
pub use normalize::{normalize_scene, normalize_value, NormalizeReport};
pub use extract::{Extraction, ExtractionTier, Extractor};
pub use repair::{ChatRepairer, NoRepair, TextRepairer};
pub use config::PipelineConfig;
pub use fonts::{FontCache, FontCatalog};
pub use measure::{MeasureRequest, Measurement, MeasurementEngine};
pub use reconcile::{ReconcileReport, Reconciler};
pub use cta::{fix_cta, CtaOutcome};
pub use bbox::{crop_to_content, foreground_bounds, BoundingBox, CropError};
pub use hashing::{canonical_json, scene_hash};
pub use pipeline::{BannerPipeline, PipelineError, ResolutionManifest, ResolvedBanner};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log to stderr, filtered by `RUST_LOG`. Stdout is reserved for JSON.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
