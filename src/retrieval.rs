//! Cross-tenant retrieval engine.
//!
//! One query runs the pipeline EmbedQuery → FanOutSearch → Merge → Rank →
//! Truncate. Fan-out issues one concurrent task per active link plus one
//! for the caller's own store, all sharing a single deadline. A failed or
//! timed-out store is logged and reported in
//! [`RetrievalOutcome::unreachable_sources`] rather than failing the query;
//! the query only fails outright when the query embedding is unavailable or
//! no store responds at all.
//!
//! Ordering is fully deterministic for identical inputs: weighted score
//! descending, then `updated_at` descending, then unit id ascending. The
//! link list is resolved once per query and never re-read mid-flight.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding::{EmbedError, EmbeddingGateway};
use crate::links::{LinkDirectory, LinkError};
use crate::models::{KnowledgeLink, RankedResult, RetrievalOutcome};
use crate::store::{ContentStore, StoreHit};

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Fatal per-query: without a query vector there is nothing to search.
    /// The wrapped [`EmbedError`] distinguishes "try again" (transient)
    /// from "misconfigured" (rejected).
    #[error("query embedding unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbedError),
    /// Fatal per-query: every store (own and linked) failed or timed out.
    #[error("no knowledge stores reachable")]
    NoSourcesAvailable,
    #[error("failed to resolve links: {0}")]
    LinkResolution(#[from] LinkError),
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    /// Overrides the configured global result cap.
    pub max_results: Option<usize>,
}

pub struct RetrievalEngine {
    store: Arc<dyn ContentStore>,
    links: Arc<dyn LinkDirectory>,
    gateway: Arc<EmbeddingGateway>,
    config: RetrievalConfig,
    query_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn ContentStore>,
        links: Arc<dyn LinkDirectory>,
        gateway: Arc<EmbeddingGateway>,
        config: RetrievalConfig,
    ) -> Self {
        let query_timeout = Duration::from_secs(config.query_timeout_secs);
        Self {
            store,
            links,
            gateway,
            config,
            query_timeout,
        }
    }

    /// Shrink the fan-out deadline, mainly for tests.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Name of the embedding model behind this engine.
    pub fn model_name(&self) -> &str {
        self.gateway.model_name()
    }

    /// Run one query for `source_tenant_id`.
    pub async fn retrieve(
        &self,
        source_tenant_id: &str,
        query_text: &str,
        options: RetrievalOptions,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        // EmbedQuery
        let query_vec = Arc::new(self.gateway.embed_one(query_text).await?);

        // Immutable link snapshot for the whole query.
        let links = self.links.resolve_active_links(source_tenant_id).await?;
        debug!(
            tenant = source_tenant_id,
            linked_stores = links.len(),
            "fanning out search"
        );

        // FanOutSearch: own store plus one task per link, shared deadline.
        let deadline = Instant::now() + self.query_timeout;
        let mut sources: Vec<Option<KnowledgeLink>> = Vec::with_capacity(links.len() + 1);
        sources.push(None);
        sources.extend(links.into_iter().map(Some));

        let handles: Vec<_> = sources
            .iter()
            .map(|source| {
                let store = Arc::clone(&self.store);
                let query = Arc::clone(&query_vec);
                let tenant = match source {
                    None => source_tenant_id.to_string(),
                    Some(link) => link.target_tenant_id.clone(),
                };
                let filters = source
                    .as_ref()
                    .map(|l| l.filters.clone())
                    .unwrap_or_default();
                let top_k = self.config.candidate_k;

                tokio::spawn(async move {
                    timeout_at(
                        deadline,
                        store.search_by_vector(&tenant, &query, &filters, top_k),
                    )
                    .await
                })
            })
            .collect();

        let settled = join_all(handles).await;

        let mut per_source: Vec<(Option<KnowledgeLink>, Vec<StoreHit>)> = Vec::new();
        let mut unreachable: Vec<String> = Vec::new();

        for (source, joined) in sources.into_iter().zip(settled) {
            let tenant = match &source {
                None => source_tenant_id.to_string(),
                Some(link) => link.target_tenant_id.clone(),
            };
            match joined {
                Ok(Ok(Ok(hits))) => per_source.push((source, hits)),
                Ok(Ok(Err(e))) => {
                    warn!(tenant = %tenant, error = %e, "store search failed, excluding source");
                    unreachable.push(tenant);
                }
                Ok(Err(_elapsed)) => {
                    warn!(tenant = %tenant, "store search hit the query deadline, excluding source");
                    unreachable.push(tenant);
                }
                Err(join_err) => {
                    warn!(tenant = %tenant, error = %join_err, "store search task aborted");
                    unreachable.push(tenant);
                }
            }
        }

        if per_source.is_empty() {
            return Err(RetrievalError::NoSourcesAvailable);
        }

        // Merge + Rank + Truncate
        let mut results = merge(source_tenant_id, per_source);
        rank(&mut results);
        let cap = options.max_results.unwrap_or(self.config.global_limit);
        results.truncate(cap);

        unreachable.sort();
        Ok(RetrievalOutcome {
            results,
            unreachable_sources: unreachable,
        })
    }
}

/// Apply per-link threshold, per-link cap, and link weight; own-store hits
/// pass through at weight 1.0 with no threshold or cap.
///
/// The per-link cap runs here, before the global cap, so one high-scoring
/// link cannot starve the others.
fn merge(
    source_tenant_id: &str,
    per_source: Vec<(Option<KnowledgeLink>, Vec<StoreHit>)>,
) -> Vec<RankedResult> {
    let mut merged = Vec::new();

    for (source, hits) in per_source {
        match source {
            None => {
                for hit in hits {
                    merged.push(to_result(hit, source_tenant_id, 1.0));
                }
            }
            Some(link) => {
                let kept = hits
                    .into_iter()
                    .filter(|h| h.similarity >= link.min_similarity)
                    .take(link.max_results);
                for hit in kept {
                    merged.push(to_result(hit, &link.target_tenant_id, link.weight));
                }
            }
        }
    }

    merged
}

fn to_result(hit: StoreHit, origin_tenant_id: &str, weight: f64) -> RankedResult {
    RankedResult {
        unit_id: hit.unit_id,
        origin_tenant_id: origin_tenant_id.to_string(),
        title: hit.title,
        text: hit.text,
        source_type: hit.source_type,
        raw_similarity: hit.similarity,
        link_weight: weight,
        weighted_score: hit.similarity * weight,
        updated_at: hit.updated_at,
    }
}

/// Weighted score descending, more recent first, id ascending.
fn rank(results: &mut [RankedResult]) {
    results.sort_by(|a, b| {
        b.weighted_score
            .partial_cmp(&a.weighted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.unit_id.cmp(&b.unit_id))
    });
}
