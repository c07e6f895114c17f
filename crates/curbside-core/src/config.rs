use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CurbsideError, Result};

/// Top-level configuration for Curbside.
///
/// Loaded from `~/.curbside/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurbsideConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CurbsideConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CurbsideConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing or
    /// cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings the system cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(CurbsideError::Config(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.search.threshold) {
            return Err(CurbsideError::Config(format!(
                "search.threshold must be within [-1, 1], got {}",
                self.search.threshold
            )));
        }
        if self.search.max_top_k == 0 {
            return Err(CurbsideError::Config(
                "search.max_top_k must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.timeout_secs == 0 {
            return Err(CurbsideError::Config(
                "pipeline.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.storage.list_limit == 0 {
            return Err(CurbsideError::Config(
                "storage.list_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read a required credential from the environment.
pub fn require_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(CurbsideError::Config(format!(
            "environment variable {} is required",
            var
        ))),
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite report store.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.curbside/data".to_string(),
            log_level: "info".to_string(),
            port: 8000,
        }
    }
}

/// Embedding collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "onnx", "http" or "mock".
    pub provider: String,
    /// Model name sent to HTTP providers.
    pub model: String,
    /// Directory with `model.onnx` and `tokenizer.json` for the onnx provider.
    pub model_dir: String,
    pub api_base: String,
    pub path: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Fixed vector dimension of the index.
    pub dimensions: usize,
    /// Maximum texts per embedding request.
    pub batch_size: usize,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "http".to_string(),
            model: "text-embedding-004".to_string(),
            model_dir: "~/.curbside/models/all-MiniLM-L6-v2".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            path: "/embeddings".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            dimensions: 768,
            batch_size: 100,
            timeout_ms: 30_000,
        }
    }
}

/// Text-generation collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// "http" or "disabled".
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub path: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "http".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            path: "/chat/completions".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.0,
            timeout_ms: 20_000,
        }
    }
}

/// Similarity search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result count for direct semantic search.
    pub default_top_k: usize,
    /// Upper bound accepted from callers.
    pub max_top_k: usize,
    /// Candidate count retrieved by the pipeline.
    pub pipeline_top_k: usize,
    /// Minimum cosine similarity kept.
    pub threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 20,
            max_top_k: 100,
            pipeline_top_k: 15,
            threshold: 0.5,
        }
    }
}

/// Retrieval pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run the relevance refinement stage by default.
    pub refine: bool,
    /// Number of top candidates shown to the refiner.
    pub refine_window: usize,
    /// Per-query deadline.
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            refine: false,
            refine_window: 10,
            timeout_secs: 30,
        }
    }
}

/// Report store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Page size of a report listing snapshot.
    pub list_limit: usize,
    /// Cap on reports returned by a field filter.
    pub filter_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            list_limit: 100,
            filter_limit: 500,
        }
    }
}
