//! Text Repair Collaborator
//!
//! Last-but-one extraction tier: a chat model is asked to return the first
//! clean scene from the messy output.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::RepairConfig;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("Repair tier is disabled")]
    Disabled,

    #[error("Repair request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Repair service returned HTTP {0}")]
    Status(u16),

    #[error("Repair service returned no content")]
    EmptyResponse,
}

/// Turns malformed model output into (hopefully) well-formed text.
pub trait TextRepairer {
    fn repair(
        &self,
        raw: &str,
        schema_hint: &str,
    ) -> impl Future<Output = Result<String, RepairError>> + Send;
}

/// Skips the repair tier entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRepair;

impl TextRepairer for NoRepair {
    async fn repair(&self, _raw: &str, _schema_hint: &str) -> Result<String, RepairError> {
        Err(RepairError::Disabled)
    }
}

/// An unconfigured repairer behaves like `NoRepair`.
impl<T: TextRepairer + Sync> TextRepairer for Option<T> {
    async fn repair(&self, raw: &str, schema_hint: &str) -> Result<String, RepairError> {
        match self {
            Some(repairer) => repairer.repair(raw, schema_hint).await,
            None => Err(RepairError::Disabled),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str =
    "You clean up JSON. Reply with the cleaned JSON only, wrapped in <json></json>, no commentary.";

/// OpenAI-compatible chat-completions client.
pub struct ChatRepairer {
    client: reqwest::Client,
    config: RepairConfig,
    api_key: Option<String>,
}

impl ChatRepairer {
    pub fn new(config: RepairConfig) -> Result<Self, RepairError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(var = %config.api_key_env, "no API key set for repair service");
        }
        Ok(Self { client, config, api_key })
    }

    fn prompt(raw: &str, schema_hint: &str) -> String {
        format!(
            "The text below should contain a banner scene as JSON, but it may repeat itself, \
             stop half way or carry extra prose.\n\
             Return the FIRST complete scene, drop duplicated objects, and keep only these fields:\n\
             {schema_hint}\n\n\
             Text:\n{raw}\n\n\
             Answer as:\n<json>\n...\n</json>"
        )
    }
}

impl TextRepairer for ChatRepairer {
    async fn repair(&self, raw: &str, schema_hint: &str) -> Result<String, RepairError> {
        let prompt = Self::prompt(raw, schema_hint);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &prompt },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RepairError::Status(response.status().as_u16()));
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(RepairError::EmptyResponse)
    }
}
