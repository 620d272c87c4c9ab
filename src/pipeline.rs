//! Resolution Pipeline - Single Entry Point
//!
//! raw model text -> extract -> catalog fonts -> reconcile -> CTA fix.
//! Only an unrecoverable extraction fails the call; everything else is
//! recorded in the manifest.

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::bbox::{crop_to_content, BoundingBox, CropError};
use crate::config::{ConfigError, PipelineConfig};
use crate::cta::{fix_cta, CtaOutcome};
use crate::extract::{Extraction, ExtractionTier, Extractor};
use crate::fonts::{FontCache, FontCatalog, FontFetchError};
use crate::hashing::{input_hash, scene_hash};
use crate::measure::{ConfiguredEngine, MeasurementEngine};
use crate::normalize::NormalizeReport;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::repair::{ChatRepairer, RepairError, TextRepairer};
use crate::scene::Scene;
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No scene could be extracted (input {0})")]
    ExtractionFailed(String),

    #[error(transparent)]
    Crop(#[from] CropError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Font cache unavailable: {0}")]
    FontCache(#[from] FontFetchError),

    #[error("Repair client unavailable: {0}")]
    Repair(#[from] RepairError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Audit record of one resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
    pub input_hash: String,
    pub scene_hash: String,
    pub extraction_tier: ExtractionTier,
    pub fonts_attached: usize,
    pub normalize: NormalizeReport,
    pub reconcile: ReconcileReport,
    pub cta: CtaOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedBanner {
    pub scene: Scene,
    pub manifest: ResolutionManifest,
}

pub struct BannerPipeline<R, M> {
    extractor: Extractor<R>,
    reconciler: Reconciler<M>,
    catalog: Option<FontCatalog>,
    crop_padding: u32,
}

impl<R: TextRepairer, M: MeasurementEngine> BannerPipeline<R, M> {
    pub fn new(extractor: Extractor<R>, reconciler: Reconciler<M>) -> Self {
        Self {
            extractor,
            reconciler,
            catalog: None,
            crop_padding: 0,
        }
    }

    pub fn with_catalog(mut self, catalog: FontCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_crop_padding(mut self, padding: u32) -> Self {
        self.crop_padding = padding;
        self
    }

    /// Turn raw model output into a measured, CTA-consistent scene.
    pub async fn resolve(&self, raw: &str) -> Result<ResolvedBanner, PipelineError> {
        let input_hash = input_hash(raw);

        let Some(Extraction { mut scene, report, tier }) = self.extractor.extract(raw).await else {
            return Err(PipelineError::ExtractionFailed(input_hash));
        };
        tracing::info!(?tier, objects = scene.objects.len(), "scene extracted");

        let fonts_attached = self
            .catalog
            .as_ref()
            .map_or(0, |catalog| catalog.attach_font_urls(&mut scene));

        let reconcile = self.reconciler.reconcile(&mut scene).await;
        let cta = fix_cta(&mut scene);

        let manifest = ResolutionManifest {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            input_hash,
            scene_hash: scene_hash(&scene)?,
            extraction_tier: tier,
            fonts_attached,
            normalize: report,
            reconcile,
            cta,
        };

        tracing::info!(
            id = %manifest.id,
            measured = manifest.reconcile.measured.len(),
            failures = manifest.reconcile.failures.len(),
            "scene resolved"
        );
        Ok(ResolvedBanner { scene, manifest })
    }

    /// Crop a product image to its foreground with the configured padding.
    pub fn crop(&self, img: &DynamicImage) -> Result<(DynamicImage, BoundingBox), PipelineError> {
        Ok(crop_to_content(img, self.crop_padding)?)
    }
}

impl BannerPipeline<Option<ChatRepairer>, ConfiguredEngine> {
    /// Wire every collaborator from configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.check()?;

        let repairer = config.repair.clone().map(ChatRepairer::new).transpose()?;
        let fonts = FontCache::open(config.font_cache_dir.clone())?;
        let engine = ConfiguredEngine::from_config(&config.measurement);

        let mut pipeline = Self::new(
            Extractor::new(repairer),
            Reconciler::from_config(engine, fonts, config),
        )
        .with_crop_padding(config.crop_padding);

        if let Some(path) = &config.font_catalog {
            pipeline = pipeline.with_catalog(FontCatalog::load_from_path(path)?);
        }
        Ok(pipeline)
    }
}
