use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::vector::EMBEDDING_DIMS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub links: LinksConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk size in bytes of UTF-8 text.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2800
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"mock"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Total attempts per batch, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}
fn default_dims() -> usize {
    EMBEDDING_DIMS
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Global result cap after merge and per-link caps.
    #[serde(default = "default_global_limit")]
    pub global_limit: usize,
    /// Top-K fetched from each store before the cross-store merge.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Shared deadline for one query's fan-out.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            global_limit: default_global_limit(),
            candidate_k: default_candidate_k(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_global_limit() -> usize {
    15
}
fn default_candidate_k() -> usize {
    50
}
fn default_query_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinksConfig {
    #[serde(default = "default_weight")]
    pub default_weight: f64,
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    #[serde(default)]
    pub default_min_similarity: f64,
    /// Skip the pending state when creating links. Intended for single-team
    /// deployments; production platforms approve links explicitly.
    #[serde(default)]
    pub auto_approve: bool,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            default_weight: default_weight(),
            default_max_results: default_max_results(),
            default_min_similarity: 0.0,
            auto_approve: false,
        }
    }
}

fn default_weight() -> f64 {
    1.0
}
fn default_max_results() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars < 16 {
        anyhow::bail!("chunking.max_chars must be >= 16");
    }

    if config.retrieval.global_limit < 1 {
        anyhow::bail!("retrieval.global_limit must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if config.retrieval.query_timeout_secs < 1 {
        anyhow::bail!("retrieval.query_timeout_secs must be >= 1");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "mock" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or mock.",
            other
        ),
    }

    if config.links.default_weight <= 0.0 {
        anyhow::bail!("links.default_weight must be > 0");
    }
    if config.links.default_max_results < 1 {
        anyhow::bail!("links.default_max_results must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.links.default_min_similarity) {
        anyhow::bail!("links.default_min_similarity must be in [0.0, 1.0]");
    }

    Ok(())
}
