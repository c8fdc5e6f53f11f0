/// Configuration module for coderag.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assembler::BudgetUnit;
use crate::embedder::limiter::EmbedLimiter;
use crate::embedder::retry::Backoff;
use crate::indexer::openai::OpenAiConfig;

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./coderag.db".to_string()
}

fn default_model_name() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_max_code_chars() -> usize {
    2000
}

fn default_batch_size() -> usize {
    32
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_candidates() -> usize {
    20
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_summary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_summary_max_tokens() -> u32 {
    200
}

fn default_summary_max_input_chars() -> usize {
    8_000
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub chunker: ChunkerConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub assembler: AssemblerConfig,

    #[serde(default)]
    pub embedder: EmbedderConfig,

    /// Symbol summaries are generated only when this section is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarizer: Option<SummarizerConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkerConfig {
    /// Code chunks are cut at the last line boundary below this length.
    #[serde(default = "default_max_code_chars")]
    pub max_code_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Provider calls in flight across the whole process.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AssemblerConfig {
    /// Nearest neighbours fetched before packing.
    #[serde(default = "default_candidates")]
    pub candidates: usize,

    #[serde(default)]
    pub budget_unit: BudgetUnit,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbedderConfig {
    /// OpenAI-compatible base URL. Unset selects the offline mock embedder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SummarizerConfig {
    /// OpenAI-compatible base URL serving `/chat/completions`.
    pub endpoint: String,

    #[serde(default = "default_summary_model")]
    pub model: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_summary_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_summary_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            model: ModelConfig::default(),
            chunker: ChunkerConfig::default(),
            indexer: IndexerConfig::default(),
            assembler: AssemblerConfig::default(),
            embedder: EmbedderConfig::default(),
            summarizer: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_code_chars: default_max_code_chars(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            budget_unit: BudgetUnit::default(),
        }
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_api_key_env(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"coderag.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "coderag.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "coderag.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.model.name.trim().is_empty(), "model.name must be set");
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            self.chunker.max_code_chars > 0,
            "chunker.max_code_chars must be positive"
        );
        anyhow::ensure!(self.indexer.batch_size > 0, "indexer.batch_size must be positive");
        anyhow::ensure!(
            self.indexer.max_concurrency > 0,
            "indexer.max_concurrency must be positive"
        );
        anyhow::ensure!(
            self.indexer.max_attempts > 0,
            "indexer.max_attempts must be positive"
        );
        anyhow::ensure!(
            self.indexer.base_backoff_ms <= self.indexer.max_backoff_ms,
            "indexer.base_backoff_ms must not exceed indexer.max_backoff_ms"
        );
        anyhow::ensure!(
            self.indexer.call_timeout_ms > 0,
            "indexer.call_timeout_ms must be positive"
        );
        anyhow::ensure!(
            self.assembler.candidates > 0,
            "assembler.candidates must be positive"
        );
        if let Some(summarizer) = &self.summarizer {
            anyhow::ensure!(
                !summarizer.endpoint.trim().is_empty(),
                "summarizer.endpoint must be set"
            );
            anyhow::ensure!(!summarizer.model.trim().is_empty(), "summarizer.model must be set");
            anyhow::ensure!(summarizer.max_tokens > 0, "summarizer.max_tokens must be positive");
            anyhow::ensure!(
                summarizer.max_input_chars > 0,
                "summarizer.max_input_chars must be positive"
            );
            anyhow::ensure!(
                summarizer.max_concurrency > 0,
                "summarizer.max_concurrency must be positive"
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.indexer.base_backoff_ms),
            max: Duration::from_millis(self.indexer.max_backoff_ms),
            max_attempts: self.indexer.max_attempts,
        }
    }

    /// Build the process-wide provider limiter.
    #[must_use]
    pub fn limiter(&self) -> EmbedLimiter {
        EmbedLimiter::new(
            self.indexer.max_concurrency,
            Duration::from_millis(self.indexer.call_timeout_ms),
        )
    }

    /// API key for the embedding endpoint, read from the configured variable.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        env_key(&self.embedder.api_key_env)
    }

    /// Client settings for the summarizer, if one is configured.
    #[must_use]
    pub fn summarizer_settings(&self) -> Option<OpenAiConfig> {
        self.summarizer.as_ref().map(|s| OpenAiConfig {
            base_url: s.endpoint.clone(),
            api_key: env_key(&s.api_key_env),
            model: s.model.clone(),
            max_tokens: s.max_tokens,
            max_input_chars: s.max_input_chars,
        })
    }
}

fn env_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.is_empty())
}
