//! Pipeline Configuration - Defaults Are the Contract
//!
//! Every field has a default so an empty `{}` file is a valid config.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Invalid config {0}: {1}")]
    Parse(PathBuf, serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Upper bound on in-flight font downloads and measurement calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_font_cache_dir")]
    pub font_cache_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub font_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub measure_timeout_secs: u64,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub repair: Option<RepairConfig>,
    #[serde(default)]
    pub font_catalog: Option<PathBuf>,
    #[serde(default)]
    pub crop_padding: u32,
}

fn default_concurrency() -> usize { 10 }
fn default_font_cache_dir() -> PathBuf { PathBuf::from("tmp/fonts") }
fn default_timeout_secs() -> u64 { 30 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            font_cache_dir: default_font_cache_dir(),
            font_timeout_secs: default_timeout_secs(),
            measure_timeout_secs: default_timeout_secs(),
            measurement: MeasurementConfig::default(),
            repair: None,
            font_catalog: None,
            crop_padding: 0,
        }
    }
}

impl PipelineConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.font_timeout_secs == 0 || self.measure_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".into()));
        }
        Ok(())
    }

    pub fn font_timeout(&self) -> Duration {
        Duration::from_secs(self.font_timeout_secs)
    }

    pub fn measure_timeout(&self) -> Duration {
        Duration::from_secs(self.measure_timeout_secs)
    }
}

/// Where text measurements come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MeasurementConfig {
    /// POST the request as JSON, read the measurement back.
    Http { endpoint: String },
    /// Run a local layout program as `<program> <args..> <input.json> <output.json>`.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self::Http { endpoint: "http://127.0.0.1:3000/measure".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_repair_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String { "OPENAI_API_KEY".to_string() }
fn default_temperature() -> f32 { 0.1 }
fn default_max_tokens() -> u32 { 4000 }
fn default_repair_timeout_secs() -> u64 { 120 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.font_cache_dir, PathBuf::from("tmp/fonts"));
        assert_eq!(config.measure_timeout(), Duration::from_secs(30));
        assert_eq!(config.crop_padding, 0);
        assert!(config.repair.is_none());
    }

    #[test]
    fn test_command_measurement_config() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"measurement": {"kind": "command", "program": "node", "args": ["get_font_size.js"]}}"#,
        ).unwrap();
        assert_eq!(
            config.measurement,
            MeasurementConfig::Command {
                program: "node".into(),
                args: vec!["get_font_size.js".into()],
            }
        );
    }

    #[test]
    fn test_repair_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"repair": {"endpoint": "https://api.example.com/v1/chat/completions", "model": "gpt-4o"}}"#,
        ).unwrap();
        let repair = config.repair.unwrap();
        assert_eq!(repair.api_key_env, "OPENAI_API_KEY");
        assert_eq!(repair.max_tokens, 4000);
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": 0}}"#).unwrap();
        assert!(matches!(
            PipelineConfig::load_from_path(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
