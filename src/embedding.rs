//! Embedding gateway: batching, retry, and failure isolation around an
//! external `embed(texts) -> vectors` capability.
//!
//! The [`Embedder`] trait is the provider seam. [`OpenAiEmbedder`] calls the
//! OpenAI embeddings API; [`MockEmbedder`] produces deterministic vectors
//! for tests and offline use. [`EmbeddingGateway`] wraps any provider with
//! batch splitting and bounded exponential backoff, and validates that the
//! provider honours the order/count/dimensionality contract.
//!
//! # Retry strategy
//!
//! Only transient failures are retried (rate limits, server errors, network
//! errors). Rejected input and quota exhaustion surface immediately. The
//! backoff doubles per attempt and the attempt count is bounded (3 by
//! default), so a dead provider fails a call in seconds, not minutes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::EmbeddingConfig;

/// Errors surfaced by embedding providers and the gateway.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Worth retrying: rate limit, server error, or network failure.
    #[error("transient embedding failure: {0}")]
    Transient(String),
    /// Not worth retrying: invalid input, auth failure, quota exhausted.
    #[error("embedding request rejected: {0}")]
    Rejected(String),
    /// The provider violated the response contract (count or dims).
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

/// External embedding capability: `embed(texts) -> vectors`, same order and
/// count as the input, all vectors of [`dims`](Embedder::dims) length.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one batch. Implementations make a single attempt; retry policy
    /// belongs to the [`EmbeddingGateway`].
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Batching + retry wrapper around an [`Embedder`].
pub struct EmbeddingGateway {
    inner: Arc<dyn Embedder>,
    batch_limit: usize,
    max_attempts: u32,
    retry_base: Duration,
}

impl EmbeddingGateway {
    pub fn new(inner: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            inner,
            batch_limit: config.batch_size.max(1),
            max_attempts: config.max_retries.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
        }
    }

    pub fn dims(&self) -> usize {
        self.inner.dims()
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    /// Embed `texts`, splitting into provider-sized batches.
    ///
    /// Returns one vector per input text, in input order. An empty input
    /// yields an empty output without touching the provider.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_limit) {
            let vectors = self.call_with_retry(batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbedError::Malformed(format!(
                    "sent {} texts, got {} vectors",
                    batch.len(),
                    vectors.len()
                )));
            }
            for v in &vectors {
                if v.len() != self.inner.dims() {
                    return Err(EmbedError::Malformed(format!(
                        "expected {} dims, got {}",
                        self.inner.dims(),
                        v.len()
                    )));
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed a single text (e.g. a search query).
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Malformed("empty embedding response".into()))
    }

    async fn call_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut last_err = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.retry_base * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            match self.inner.embed(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() => {
                    warn!(
                        model = self.inner.model_name(),
                        attempt = attempt + 1,
                        error = %e,
                        "transient embedding failure, will retry"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| EmbedError::Transient("no attempts made".into())))
    }
}

// ============ OpenAI provider ============

/// Embedding provider backed by the OpenAI embeddings API.
///
/// Requires `OPENAI_API_KEY` in the environment. Makes a single attempt per
/// call and classifies failures for the gateway: HTTP 429 and 5xx are
/// transient, other 4xx are rejections.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let json: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| EmbedError::Malformed(e.to_string()))?;
            return parse_openai_response(&json);
        }

        let body_text = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(EmbedError::Transient(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )))
        } else {
            Err(EmbedError::Rejected(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )))
        }
    }
}

/// Extract `data[].embedding` arrays in input order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing data array".into()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

    for (i, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Malformed("missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(i);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Mock provider ============

/// Deterministic offline provider: each text maps to a unit vector derived
/// from its SHA-256 digest. Identical text always embeds identically, which
/// is what the ingestion and retrieval tests rely on.
pub struct MockEmbedder {
    dims: usize,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }
}

fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut counter: u64 = 0;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for pair in digest.chunks_exact(2) {
            if out.len() == dims {
                break;
            }
            let raw = u16::from_le_bytes([pair[0], pair[1]]);
            out.push(raw as f32 / u16::MAX as f32 - 0.5);
        }
        counter += 1;
    }

    // Normalize so cosine against itself is exactly 1 within tolerance.
    let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut out {
            *v /= norm;
        }
    }
    out
}

/// Instantiate the provider named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dims))),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}
