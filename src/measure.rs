//! Text Measurement Engines
//!
//! Font-accurate geometry only comes from an external layout engine. Two
//! transports: an HTTP service, or a local program driven through temp files.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::config::MeasurementConfig;
use crate::scene::TextElement;

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("Measurement request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Measurement service returned HTTP {0}")]
    Status(u16),

    #[error("Measurement I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Layout program failed: {0}")]
    Process(String),

    #[error("Unreadable measurement: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Implausible measurement: {0}")]
    Invalid(String),
}

/// What the engine needs to lay out one text element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureRequest {
    pub ideal_left: f64,
    pub ideal_top: f64,
    pub ideal_width: f64,
    pub ideal_height: f64,
    pub font_family: String,
    pub text: String,
    pub alignment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
}

impl MeasureRequest {
    pub fn for_text(text: &TextElement, font_path: Option<PathBuf>) -> Self {
        Self {
            ideal_left: text.geometry.left,
            ideal_top: text.geometry.top,
            ideal_width: text.geometry.width,
            ideal_height: text.geometry.height,
            font_family: text.font_family.clone().unwrap_or_default(),
            text: text.text.clone(),
            alignment: text.text_align.clone().unwrap_or_else(|| "left".to_string()),
            font_path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub font_size: f64,
}

impl Measurement {
    pub fn check(self) -> Result<Self, MeasureError> {
        let values = [self.left, self.top, self.width, self.height, self.font_size];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MeasureError::Invalid("non-finite value".into()));
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err(MeasureError::Invalid(format!("negative size {}x{}", self.width, self.height)));
        }
        if self.font_size <= 0.0 {
            return Err(MeasureError::Invalid(format!("font size {}", self.font_size)));
        }
        Ok(self)
    }
}

/// A deterministic text layout engine.
pub trait MeasurementEngine {
    fn measure(
        &self,
        request: &MeasureRequest,
    ) -> impl Future<Output = Result<Measurement, MeasureError>> + Send;
}

pub struct HttpMeasurementEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMeasurementEngine {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

impl MeasurementEngine for HttpMeasurementEngine {
    async fn measure(&self, request: &MeasureRequest) -> Result<Measurement, MeasureError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        if !response.status().is_success() {
            return Err(MeasureError::Status(response.status().as_u16()));
        }
        response.json::<Measurement>().await?.check()
    }
}

/// Runs `<program> <args..> <input.json> <output.json>` once per request.
pub struct CommandMeasurementEngine {
    program: String,
    args: Vec<String>,
    scratch_dir: PathBuf,
}

impl CommandMeasurementEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    async fn run(&self, input: &Path, output: &Path, request: &MeasureRequest) -> Result<Measurement, MeasureError> {
        tokio::fs::write(input, serde_json::to_vec(request)?).await?;

        let result = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(MeasureError::Process(format!("{}: {}", result.status, stderr.trim())));
        }

        let body = tokio::fs::read(output).await?;
        serde_json::from_slice::<Measurement>(&body)?.check()
    }
}

impl MeasurementEngine for CommandMeasurementEngine {
    async fn measure(&self, request: &MeasureRequest) -> Result<Measurement, MeasureError> {
        let job = Uuid::new_v4();
        let input = self.scratch_dir.join(format!("{}.json", job));
        let output = self.scratch_dir.join(format!("{}_updated.json", job));

        let result = self.run(&input, &output, request).await;

        let _ = tokio::fs::remove_file(&input).await;
        let _ = tokio::fs::remove_file(&output).await;
        result
    }
}

/// Engine chosen by configuration.
pub enum ConfiguredEngine {
    Http(HttpMeasurementEngine),
    Command(CommandMeasurementEngine),
}

impl ConfiguredEngine {
    pub fn from_config(config: &MeasurementConfig) -> Self {
        match config {
            MeasurementConfig::Http { endpoint } => Self::Http(HttpMeasurementEngine::new(endpoint.clone())),
            MeasurementConfig::Command { program, args } => {
                Self::Command(CommandMeasurementEngine::new(program.clone(), args.clone()))
            }
        }
    }
}

impl MeasurementEngine for ConfiguredEngine {
    async fn measure(&self, request: &MeasureRequest) -> Result<Measurement, MeasureError> {
        match self {
            Self::Http(engine) => engine.measure(request).await,
            Self::Command(engine) => engine.measure(request).await,
        }
    }
}
