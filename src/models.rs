//! Core data models used throughout Knowledge Mesh.
//!
//! These types represent the content units, cross-tenant links, and ranked
//! results that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Where a content unit originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Document,
    WebPage,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Document => "document",
            SourceType::WebPage => "web-page",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(SourceType::Document),
            "web-page" => Some(SourceType::WebPage),
            _ => None,
        }
    }
}

/// One indexed piece of knowledge: a document chunk or a web-page extract.
///
/// A unit is uniquely addressed by `(tenant_id, source_id, chunk_index,
/// version)`. Only one version per source is active at a time, and an
/// active unit always carries an embedding computed from its current text.
#[derive(Debug, Clone)]
pub struct ContentUnit {
    pub id: String,
    pub tenant_id: String,
    /// Identity of the originating document or web page.
    pub source_id: String,
    pub source_type: SourceType,
    pub chunk_index: i64,
    pub title: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
    pub version: i64,
    pub active: bool,
    /// SHA-256 of the full source text this unit was chunked from.
    pub content_hash: String,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Lifecycle status of a knowledge base link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Pending,
    Active,
    Suspended,
    Rejected,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Active => "active",
            LinkStatus::Suspended => "suspended",
            LinkStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LinkStatus::Pending),
            "active" => Some(LinkStatus::Active),
            "suspended" => Some(LinkStatus::Suspended),
            "rejected" => Some(LinkStatus::Rejected),
            _ => None,
        }
    }
}

/// What a link permits the source tenant to do with the target's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    Read,
    SearchOnly,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::SearchOnly => "search-only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(AccessLevel::Read),
            "search-only" => Some(AccessLevel::SearchOnly),
            _ => None,
        }
    }
}

/// Tag and content-type filters attached to a link.
///
/// Empty lists impose no constraint. When an include list is non-empty the
/// unit must match at least one entry; a matching exclude entry rejects the
/// unit regardless of includes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkFilters {
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub include_types: Vec<SourceType>,
    #[serde(default)]
    pub exclude_types: Vec<SourceType>,
}

impl LinkFilters {
    pub fn is_empty(&self) -> bool {
        self.include_tags.is_empty()
            && self.exclude_tags.is_empty()
            && self.include_types.is_empty()
            && self.exclude_types.is_empty()
    }
}

/// Directed permission for one tenant to search another tenant's store.
///
/// At most one *active* link exists per `(source_tenant_id,
/// target_tenant_id)` pair; any non-active status contributes zero results.
#[derive(Debug, Clone)]
pub struct KnowledgeLink {
    pub id: String,
    /// The tenant performing queries.
    pub source_tenant_id: String,
    /// The tenant whose store is exposed.
    pub target_tenant_id: String,
    pub access_level: AccessLevel,
    pub filters: LinkFilters,
    /// Scales the raw similarity of every result from this link.
    pub weight: f64,
    /// Per-link result cap, enforced before the global cap.
    pub max_results: usize,
    /// Results with raw similarity below this are discarded.
    pub min_similarity: f64,
    pub status: LinkStatus,
    /// Unix timestamp after which the link stops contributing results.
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A content unit plus its computed retrieval score.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub unit_id: String,
    /// Tenant the unit belongs to (own or linked).
    pub origin_tenant_id: String,
    pub title: Option<String>,
    pub text: String,
    pub source_type: SourceType,
    /// Cosine similarity before link weighting.
    pub raw_similarity: f64,
    /// Link weight applied (1.0 for the caller's own store).
    pub link_weight: f64,
    /// `raw_similarity * link_weight`; the ranking key.
    pub weighted_score: f64,
    pub updated_at: i64,
}

impl RankedResult {
    /// Whether this result came from the querying tenant's own store.
    pub fn is_own(&self, source_tenant_id: &str) -> bool {
        self.origin_tenant_id == source_tenant_id
    }
}

/// Outcome of one retrieval call: best-effort ranked results plus the
/// linked tenants that could not be reached within the deadline.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub results: Vec<RankedResult>,
    pub unreachable_sources: Vec<String>,
}

/// Kind of change observed between two fetches of the same source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    Created,
    Updated,
    ContentChanged,
    TitleChanged,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::ContentChanged => "content-changed",
            ChangeType::TitleChanged => "title-changed",
            ChangeType::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ChangeType::Created),
            "updated" => Some(ChangeType::Updated),
            "content-changed" => Some(ChangeType::ContentChanged),
            "title-changed" => Some(ChangeType::TitleChanged),
            "deleted" => Some(ChangeType::Deleted),
            _ => None,
        }
    }
}

/// Append-only record of a detected content change. Never mutated.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub id: String,
    pub tenant_id: String,
    pub source_id: String,
    /// Empty for `Created`.
    pub old_hash: String,
    pub new_hash: String,
    /// Normalized difference in `[0.0, 1.0]`.
    pub change_pct: f64,
    pub change_type: ChangeType,
    pub created_at: i64,
}

/// Caller-supplied metadata accompanying raw text at ingestion time.
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub source_id: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub tags: Vec<String>,
}

/// What one ingestion call produced.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub unit_ids: Vec<String>,
    pub change_records: Vec<ChangeRecord>,
}
