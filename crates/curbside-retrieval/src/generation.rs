//! Text-generation collaborator used by the planner and the refiner.
//!
//! Output is untrusted free text; every consumer parses it defensively.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use curbside_core::config::{require_env, GenerationConfig};
use curbside_core::error::{CurbsideError, Result};

/// A chat-style completion service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete `prompt` under the given system instruction.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Build the generator named by `generation.provider`.
pub fn generator_from_config(cfg: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    match cfg.provider.as_str() {
        "http" => Ok(Arc::new(HttpTextGenerator::from_config(cfg)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => Err(CurbsideError::Config(format!(
            "unknown generation provider '{}' (expected http or disabled)",
            other
        ))),
    }
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct HttpTextGenerator {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl std::fmt::Debug for HttpTextGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTextGenerator")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpTextGenerator {
    pub fn from_config(cfg: &GenerationConfig) -> Result<Self> {
        let api_key = require_env(&cfg.api_key_env)?;
        Self::new(cfg, api_key)
    }

    pub fn new(cfg: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| CurbsideError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: format!("{}{}", cfg.api_base.trim_end_matches('/'), cfg.path),
            model: cfg.model.clone(),
            api_key,
            temperature: cfg.temperature,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CurbsideError::Generation(format!("request failed: {}", e)))?;
        let json: Value = res
            .error_for_status()
            .map_err(|e| CurbsideError::Generation(format!("provider returned error: {}", e)))?
            .json()
            .await
            .map_err(|e| CurbsideError::Generation(format!("invalid response body: {}", e)))?;

        parse_completion(&json)
    }
}

fn parse_completion(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .filter(|content| !content.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| CurbsideError::Generation("response has no message content".to_string()))
}

/// Offline mode: every call fails, which sends the planner and refiner down
/// their fallback paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        Err(CurbsideError::Generation("text generation is disabled".to_string()))
    }
}
