//! Ingestion pipeline and change detection.
//!
//! First-time content is chunked, embedded, and stored as version 1.
//! Re-fetched content (a scheduled re-scrape, a re-uploaded document) is
//! compared by SHA-256 content hash against the active version: an
//! unchanged hash is a cheap no-op with no re-embedding, a changed hash
//! produces a new version and an append-only [`ChangeRecord`], and the
//! prior version is deactivated but never deleted.
//!
//! A failed embed aborts before any write, so the previous active version
//! stays authoritative and no unit is ever active with a stale embedding.
//!
//! The change percentage is `1 − shared/max_len`, where `shared` is the
//! byte length of the common prefix plus common suffix of old and new
//! text (capped at the shorter length). It is deterministic and grows as
//! the texts diverge; it is a heuristic, not an edit distance.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{EmbedError, EmbeddingGateway};
use crate::models::{ChangeRecord, ChangeType, ContentUnit, IngestOutcome, SourceMetadata};
use crate::store::{ContentStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The embed call failed; the previous active version is untouched.
    #[error("embedding failed during ingestion: {0}")]
    EmbeddingFailed(#[from] EmbedError),
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
    #[error("no active content for source: {0}")]
    UnknownSource(String),
}

pub struct IngestionPipeline {
    store: Arc<dyn ContentStore>,
    gateway: Arc<EmbeddingGateway>,
    max_chunk_chars: usize,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ContentStore>,
        gateway: Arc<EmbeddingGateway>,
        chunking: &ChunkingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            max_chunk_chars: chunking.max_chars,
        }
    }

    /// Ingest one source's full text for a tenant.
    ///
    /// Dispatches on the stored state: a source with no active version
    /// (never seen, or retired) is indexed as the next version in its
    /// sequence; an unchanged hash is a no-op (metadata-only changes are
    /// applied in place); a changed hash creates the next version.
    pub async fn ingest(
        &self,
        tenant_id: &str,
        raw_text: &str,
        meta: SourceMetadata,
    ) -> Result<IngestOutcome, IngestError> {
        let new_hash = content_hash(raw_text);
        let prev = self.store.active_units(tenant_id, &meta.source_id).await?;

        if prev.is_empty() {
            return self.ingest_first(tenant_id, raw_text, &meta, &new_hash).await;
        }

        let prev_hash = prev[0].content_hash.clone();
        if prev_hash == new_hash {
            return self.apply_metadata_changes(tenant_id, &prev, &meta, &new_hash).await;
        }

        self.ingest_new_version(tenant_id, raw_text, &meta, &prev, &new_hash)
            .await
    }

    /// Deactivate a source's active version and record the deletion.
    pub async fn retire(
        &self,
        tenant_id: &str,
        source_id: &str,
    ) -> Result<ChangeRecord, IngestError> {
        let prev = self.store.active_units(tenant_id, source_id).await?;
        let first = prev
            .first()
            .ok_or_else(|| IngestError::UnknownSource(source_id.to_string()))?;

        self.store
            .deactivate_version(tenant_id, source_id, first.version)
            .await?;

        let record = make_record(
            tenant_id,
            source_id,
            &first.content_hash,
            "",
            1.0,
            ChangeType::Deleted,
        );
        self.store.append_change_record(&record).await?;
        info!(tenant = tenant_id, source = source_id, "source retired");
        Ok(record)
    }

    async fn ingest_first(
        &self,
        tenant_id: &str,
        raw_text: &str,
        meta: &SourceMetadata,
        new_hash: &str,
    ) -> Result<IngestOutcome, IngestError> {
        // A retired source still has (inactive) versioned rows; continue its
        // sequence instead of colliding with version 1.
        let version = self.store.latest_version(tenant_id, &meta.source_id).await? + 1;
        let units = self
            .build_units(tenant_id, raw_text, meta, new_hash, version)
            .await?;
        if units.is_empty() {
            debug!(tenant = tenant_id, source = %meta.source_id, "empty source, nothing indexed");
            return Ok(IngestOutcome::default());
        }

        self.store.upsert_units(&units).await?;

        let record = make_record(tenant_id, &meta.source_id, "", new_hash, 1.0, ChangeType::Created);
        self.store.append_change_record(&record).await?;

        info!(
            tenant = tenant_id,
            source = %meta.source_id,
            chunks = units.len(),
            "indexed new source"
        );
        Ok(IngestOutcome {
            unit_ids: units.into_iter().map(|u| u.id).collect(),
            change_records: vec![record],
        })
    }

    /// Hash unchanged: apply title/tag updates in place, without a new
    /// version and without touching embeddings.
    async fn apply_metadata_changes(
        &self,
        tenant_id: &str,
        prev: &[ContentUnit],
        meta: &SourceMetadata,
        new_hash: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let mut records = Vec::new();

        if prev[0].title != meta.title {
            self.store
                .update_title(tenant_id, &meta.source_id, meta.title.as_deref())
                .await?;
            let record = make_record(
                tenant_id,
                &meta.source_id,
                new_hash,
                new_hash,
                0.0,
                ChangeType::TitleChanged,
            );
            self.store.append_change_record(&record).await?;
            records.push(record);
        }

        if prev[0].tags != meta.tags {
            self.store
                .update_tags(tenant_id, &meta.source_id, &meta.tags)
                .await?;
            let record = make_record(
                tenant_id,
                &meta.source_id,
                new_hash,
                new_hash,
                0.0,
                ChangeType::Updated,
            );
            self.store.append_change_record(&record).await?;
            records.push(record);
        }

        if records.is_empty() {
            debug!(tenant = tenant_id, source = %meta.source_id, "content unchanged, no-op");
        }

        Ok(IngestOutcome {
            unit_ids: Vec::new(),
            change_records: records,
        })
    }

    async fn ingest_new_version(
        &self,
        tenant_id: &str,
        raw_text: &str,
        meta: &SourceMetadata,
        prev: &[ContentUnit],
        new_hash: &str,
    ) -> Result<IngestOutcome, IngestError> {
        let prev_version = prev[0].version;
        let prev_hash = prev[0].content_hash.clone();
        // Chunks are exact subslices, so concatenation rebuilds the prior
        // full text for the change percentage.
        let prev_text: String = prev.iter().map(|u| u.text.as_str()).collect();

        // Embed before any write. On failure the previous version stays
        // active and authoritative.
        let units = match self
            .build_units(tenant_id, raw_text, meta, new_hash, prev_version + 1)
            .await
        {
            Ok(units) => units,
            Err(e) => {
                warn!(
                    tenant = tenant_id,
                    source = %meta.source_id,
                    error = %e,
                    "embedding failed, keeping previous version active"
                );
                return Err(e);
            }
        };

        self.store.upsert_units(&units).await?;
        self.store
            .deactivate_version(tenant_id, &meta.source_id, prev_version)
            .await?;

        let pct = change_percentage(&prev_text, raw_text);
        let record = make_record(
            tenant_id,
            &meta.source_id,
            &prev_hash,
            new_hash,
            pct,
            ChangeType::ContentChanged,
        );
        self.store.append_change_record(&record).await?;

        info!(
            tenant = tenant_id,
            source = %meta.source_id,
            version = prev_version + 1,
            change_pct = pct,
            "re-indexed changed source"
        );
        Ok(IngestOutcome {
            unit_ids: units.into_iter().map(|u| u.id).collect(),
            change_records: vec![record],
        })
    }

    /// Chunk and embed, producing fully-formed active units.
    async fn build_units(
        &self,
        tenant_id: &str,
        raw_text: &str,
        meta: &SourceMetadata,
        content_hash: &str,
        version: i64,
    ) -> Result<Vec<ContentUnit>, IngestError> {
        let chunks: Vec<String> = chunk_text(raw_text, self.max_chunk_chars)
            .map(str::to_string)
            .collect();
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.gateway.embed_batch(&chunks).await?;
        let now = Utc::now().timestamp();

        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| ContentUnit {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                source_id: meta.source_id.clone(),
                source_type: meta.source_type,
                chunk_index: i as i64,
                title: meta.title.clone(),
                text,
                embedding,
                version,
                active: true,
                content_hash: content_hash.to_string(),
                tags: meta.tags.clone(),
                created_at: now,
                updated_at: now,
            })
            .collect())
    }
}

/// Hex-encoded SHA-256 of the full source text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalized difference between two texts in `[0.0, 1.0]`.
pub fn change_percentage(old: &str, new: &str) -> f64 {
    if old == new {
        return 0.0;
    }
    let max_len = old.len().max(new.len());
    if max_len == 0 {
        return 0.0;
    }

    let old_b = old.as_bytes();
    let new_b = new.as_bytes();
    let min_len = old_b.len().min(new_b.len());

    let prefix = old_b
        .iter()
        .zip(new_b.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old_b
        .iter()
        .rev()
        .zip(new_b.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let shared = (prefix + suffix).min(min_len);
    1.0 - shared as f64 / max_len as f64
}

fn make_record(
    tenant_id: &str,
    source_id: &str,
    old_hash: &str,
    new_hash: &str,
    change_pct: f64,
    change_type: ChangeType,
) -> ChangeRecord {
    ChangeRecord {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        source_id: source_id.to_string(),
        old_hash: old_hash.to_string(),
        new_hash: new_hash.to_string(),
        change_pct,
        change_type,
        created_at: Utc::now().timestamp(),
    }
}
