//! Cross-tenant link registry.
//!
//! A [`KnowledgeLink`] is the only way one tenant's queries reach another
//! tenant's store. Links start `pending` and contribute nothing until an
//! authority approves them; suspension, rejection, or expiry removes them
//! from future queries immediately.
//!
//! [`resolve_active_links`](LinkRegistry::resolve_active_links) is the
//! query-time entry point: it returns the active, unexpired links for a
//! source tenant ordered by weight descending (ties by id, so ordering is
//! deterministic). The retrieval engine treats the returned list as an
//! immutable snapshot for the duration of one query.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{AccessLevel, ContentUnit, KnowledgeLink, LinkFilters, LinkStatus, SourceType};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link not found: {0}")]
    NotFound(String),
    #[error("an active link from {source_tenant} to {target_tenant} already exists")]
    DuplicateActive {
        source_tenant: String,
        target_tenant: String,
    },
    #[error("link {id} is {status}, cannot {action}")]
    InvalidTransition {
        id: String,
        status: &'static str,
        action: &'static str,
    },
    #[error("link database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Read-only seam the retrieval engine depends on.
#[async_trait]
pub trait LinkDirectory: Send + Sync {
    /// Active, unexpired links for `source_tenant_id`, weight descending,
    /// ties broken by id ascending.
    async fn resolve_active_links(
        &self,
        source_tenant_id: &str,
    ) -> Result<Vec<KnowledgeLink>, LinkError>;
}

/// Parameters for creating a link. Weight, caps, and thresholds default
/// from `[links]` config at the call site.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub source_tenant_id: String,
    pub target_tenant_id: String,
    pub access_level: AccessLevel,
    pub filters: LinkFilters,
    pub weight: f64,
    pub max_results: usize,
    pub min_similarity: f64,
    pub expires_at: Option<i64>,
}

/// Sqlite-backed registry of [`KnowledgeLink`] records.
pub struct LinkRegistry {
    pool: SqlitePool,
}

impl LinkRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a link in `pending` state, or directly `active` when
    /// `auto_approve` is set.
    ///
    /// An existing active link for the same (source, target) pair rejects
    /// auto-approved creation; a second pending request is allowed (the
    /// approval step re-checks).
    pub async fn create_link(
        &self,
        new: NewLink,
        auto_approve: bool,
    ) -> Result<KnowledgeLink, LinkError> {
        let now = Utc::now().timestamp();
        let status = if auto_approve {
            LinkStatus::Active
        } else {
            LinkStatus::Pending
        };

        let link = KnowledgeLink {
            id: Uuid::new_v4().to_string(),
            source_tenant_id: new.source_tenant_id,
            target_tenant_id: new.target_tenant_id,
            access_level: new.access_level,
            filters: new.filters,
            weight: new.weight,
            max_results: new.max_results,
            min_similarity: new.min_similarity,
            status,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO knowledge_links
                (id, source_tenant_id, target_tenant_id, access_level,
                 include_tags, exclude_tags, include_types, exclude_types,
                 weight, max_results, min_similarity, status, expires_at,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&link.id)
        .bind(&link.source_tenant_id)
        .bind(&link.target_tenant_id)
        .bind(link.access_level.as_str())
        .bind(tags_json(&link.filters.include_tags))
        .bind(tags_json(&link.filters.exclude_tags))
        .bind(types_json(&link.filters.include_types))
        .bind(types_json(&link.filters.exclude_types))
        .bind(link.weight)
        .bind(link.max_results as i64)
        .bind(link.min_similarity)
        .bind(link.status.as_str())
        .bind(link.expires_at)
        .bind(link.created_at)
        .bind(link.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(link),
            Err(e) if is_unique_violation(&e) => Err(LinkError::DuplicateActive {
                source_tenant: link.source_tenant_id,
                target_tenant: link.target_tenant_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Approve a pending link, activating it.
    pub async fn approve(&self, link_id: &str) -> Result<(), LinkError> {
        self.transition(link_id, LinkStatus::Pending, LinkStatus::Active, "approve")
            .await
    }

    /// Suspend an active link, removing it from future queries.
    pub async fn suspend(&self, link_id: &str) -> Result<(), LinkError> {
        self.transition(link_id, LinkStatus::Active, LinkStatus::Suspended, "suspend")
            .await
    }

    /// Reject a pending link.
    pub async fn reject(&self, link_id: &str) -> Result<(), LinkError> {
        self.transition(link_id, LinkStatus::Pending, LinkStatus::Rejected, "reject")
            .await
    }

    async fn transition(
        &self,
        link_id: &str,
        from: LinkStatus,
        to: LinkStatus,
        action: &'static str,
    ) -> Result<(), LinkError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE knowledge_links SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(link_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await;

        let result = match result {
            Err(e) if is_unique_violation(&e) => {
                let link = self.get(link_id).await?;
                return Err(LinkError::DuplicateActive {
                    source_tenant: link.source_tenant_id,
                    target_tenant: link.target_tenant_id,
                });
            }
            other => other?,
        };

        if result.rows_affected() == 0 {
            // Distinguish a missing link from a wrong-state one.
            let link = self.get(link_id).await?;
            return Err(LinkError::InvalidTransition {
                id: link_id.to_string(),
                status: link.status.as_str(),
                action,
            });
        }
        Ok(())
    }

    pub async fn get(&self, link_id: &str) -> Result<KnowledgeLink, LinkError> {
        let row = sqlx::query("SELECT * FROM knowledge_links WHERE id = ?")
            .bind(link_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| link_from_row(&r))
            .ok_or_else(|| LinkError::NotFound(link_id.to_string()))
    }

    /// All links where the tenant is source or target, newest first.
    pub async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<KnowledgeLink>, LinkError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM knowledge_links
            WHERE source_tenant_id = ? OR target_tenant_id = ?
            ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(tenant_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(link_from_row).collect())
    }

    /// Flip expired active links to suspended. Resolution already filters
    /// by expiry, so this sweep only tidies the stored status.
    pub async fn sweep_expired(&self) -> Result<u64, LinkError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE knowledge_links SET status = 'suspended', updated_at = ?
            WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LinkDirectory for LinkRegistry {
    async fn resolve_active_links(
        &self,
        source_tenant_id: &str,
    ) -> Result<Vec<KnowledgeLink>, LinkError> {
        let now = Utc::now().timestamp();
        let rows = sqlx::query(
            r#"
            SELECT * FROM knowledge_links
            WHERE source_tenant_id = ?
              AND status = 'active'
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY weight DESC, id ASC
            "#,
        )
        .bind(source_tenant_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(link_from_row).collect())
    }
}

// ============ Filter evaluation ============

/// Evaluate a link's filters against a content unit.
pub fn link_accepts(link: &KnowledgeLink, unit: &ContentUnit) -> bool {
    filters_accept(&link.filters, &unit.tags, unit.source_type)
}

/// Exclude filters win over include filters; empty lists are permissive.
pub fn filters_accept(filters: &LinkFilters, tags: &[String], source_type: SourceType) -> bool {
    if filters.exclude_types.contains(&source_type) {
        return false;
    }
    if tags.iter().any(|t| filters.exclude_tags.contains(t)) {
        return false;
    }
    if !filters.include_types.is_empty() && !filters.include_types.contains(&source_type) {
        return false;
    }
    if !filters.include_tags.is_empty() && !tags.iter().any(|t| filters.include_tags.contains(t)) {
        return false;
    }
    true
}

// ============ Row mapping ============

fn tags_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn types_json(types: &[SourceType]) -> String {
    serde_json::to_string(types).unwrap_or_else(|_| "[]".to_string())
}

fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn parse_types(raw: &str) -> Vec<SourceType> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn link_from_row(row: &sqlx::sqlite::SqliteRow) -> KnowledgeLink {
    let access: String = row.get("access_level");
    let status: String = row.get("status");
    let include_tags: String = row.get("include_tags");
    let exclude_tags: String = row.get("exclude_tags");
    let include_types: String = row.get("include_types");
    let exclude_types: String = row.get("exclude_types");
    let max_results: i64 = row.get("max_results");

    KnowledgeLink {
        id: row.get("id"),
        source_tenant_id: row.get("source_tenant_id"),
        target_tenant_id: row.get("target_tenant_id"),
        access_level: AccessLevel::parse(&access).unwrap_or(AccessLevel::SearchOnly),
        filters: LinkFilters {
            include_tags: parse_tags(&include_tags),
            exclude_tags: parse_tags(&exclude_tags),
            include_types: parse_types(&include_types),
            exclude_types: parse_types(&exclude_types),
        },
        weight: row.get("weight"),
        max_results: max_results.max(0) as usize,
        min_similarity: row.get("min_similarity"),
        status: LinkStatus::parse(&status).unwrap_or(LinkStatus::Suspended),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn registry() -> LinkRegistry {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        LinkRegistry::new(pool)
    }

    fn new_link(source: &str, target: &str) -> NewLink {
        NewLink {
            source_tenant_id: source.to_string(),
            target_tenant_id: target.to_string(),
            access_level: AccessLevel::SearchOnly,
            filters: LinkFilters::default(),
            weight: 1.0,
            max_results: 5,
            min_similarity: 0.0,
            expires_at: None,
        }
    }

    fn unit_with(tags: &[&str], source_type: SourceType) -> ContentUnit {
        ContentUnit {
            id: "u1".into(),
            tenant_id: "t".into(),
            source_id: "s".into(),
            source_type,
            chunk_index: 0,
            title: None,
            text: "text".into(),
            embedding: vec![],
            version: 1,
            active: true,
            content_hash: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_created_links_start_pending_and_resolve_empty() {
        let reg = registry().await;
        reg.create_link(new_link("a", "b"), false).await.unwrap();
        assert!(reg.resolve_active_links("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approve_activates() {
        let reg = registry().await;
        let link = reg.create_link(new_link("a", "b"), false).await.unwrap();
        reg.approve(&link.id).await.unwrap();

        let active = reg.resolve_active_links("a").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].target_tenant_id, "b");
        assert_eq!(active[0].status, LinkStatus::Active);
    }

    #[tokio::test]
    async fn test_auto_approve_skips_pending() {
        let reg = registry().await;
        let link = reg.create_link(new_link("a", "b"), true).await.unwrap();
        assert_eq!(link.status, LinkStatus::Active);
        assert_eq!(reg.resolve_active_links("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_active_per_pair() {
        let reg = registry().await;
        reg.create_link(new_link("a", "b"), true).await.unwrap();
        let err = reg.create_link(new_link("a", "b"), true).await.unwrap_err();
        match err {
            LinkError::DuplicateActive {
                source_tenant,
                target_tenant,
            } => {
                assert_eq!(source_tenant, "a");
                assert_eq!(target_tenant, "b");
            }
            other => panic!("expected DuplicateActive, got {other}"),
        }

        // A second pending request is fine; approving it is not.
        let pending = reg.create_link(new_link("a", "b"), false).await.unwrap();
        let err = reg.approve(&pending.id).await.unwrap_err();
        assert!(matches!(err, LinkError::DuplicateActive { .. }));
    }

    #[tokio::test]
    async fn test_suspend_excludes_immediately() {
        let reg = registry().await;
        let link = reg.create_link(new_link("a", "b"), true).await.unwrap();
        reg.suspend(&link.id).await.unwrap();
        assert!(reg.resolve_active_links("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_requires_pending() {
        let reg = registry().await;
        let link = reg.create_link(new_link("a", "b"), true).await.unwrap();
        let err = reg.reject(&link.id).await.unwrap_err();
        assert!(matches!(err, LinkError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_expired_links_not_resolved() {
        let reg = registry().await;
        let mut link = new_link("a", "b");
        link.expires_at = Some(Utc::now().timestamp() - 60);
        reg.create_link(link, true).await.unwrap();

        assert!(reg.resolve_active_links("a").await.unwrap().is_empty());
        assert_eq!(reg.sweep_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolution_order_weight_desc_then_id() {
        let reg = registry().await;
        let mut low = new_link("a", "b");
        low.weight = 0.3;
        let mut high = new_link("a", "c");
        high.weight = 0.9;
        reg.create_link(low, true).await.unwrap();
        reg.create_link(high, true).await.unwrap();

        let links = reg.resolve_active_links("a").await.unwrap();
        assert_eq!(links[0].target_tenant_id, "c");
        assert_eq!(links[1].target_tenant_id, "b");
    }

    #[tokio::test]
    async fn test_directionality() {
        let reg = registry().await;
        reg.create_link(new_link("a", "b"), true).await.unwrap();
        assert!(reg.resolve_active_links("b").await.unwrap().is_empty());
    }

    #[test]
    fn test_filters_empty_are_permissive() {
        let f = LinkFilters::default();
        assert!(filters_accept(&f, &[], SourceType::Document));
        assert!(filters_accept(
            &f,
            &["anything".into()],
            SourceType::WebPage
        ));
    }

    #[test]
    fn test_filters_include_tags_require_match() {
        let f = LinkFilters {
            include_tags: vec!["public".into()],
            ..Default::default()
        };
        assert!(filters_accept(&f, &["public".into()], SourceType::Document));
        assert!(!filters_accept(
            &f,
            &["internal".into()],
            SourceType::Document
        ));
        assert!(!filters_accept(&f, &[], SourceType::Document));
    }

    #[test]
    fn test_filters_exclude_wins_over_include() {
        let f = LinkFilters {
            include_tags: vec!["shared".into()],
            exclude_tags: vec!["shared".into()],
            ..Default::default()
        };
        assert!(!filters_accept(&f, &["shared".into()], SourceType::Document));
    }

    #[test]
    fn test_filters_types() {
        let f = LinkFilters {
            include_types: vec![SourceType::Document],
            ..Default::default()
        };
        assert!(filters_accept(&f, &[], SourceType::Document));
        assert!(!filters_accept(&f, &[], SourceType::WebPage));

        let f = LinkFilters {
            exclude_types: vec![SourceType::WebPage],
            ..Default::default()
        };
        assert!(!filters_accept(&f, &[], SourceType::WebPage));
    }

    #[test]
    fn test_link_accepts_uses_unit_fields() {
        let mut link_rec = KnowledgeLink {
            id: "l".into(),
            source_tenant_id: "a".into(),
            target_tenant_id: "b".into(),
            access_level: AccessLevel::SearchOnly,
            filters: LinkFilters {
                exclude_tags: vec!["secret".into()],
                ..Default::default()
            },
            weight: 1.0,
            max_results: 5,
            min_similarity: 0.0,
            status: LinkStatus::Active,
            expires_at: None,
            created_at: 0,
            updated_at: 0,
        };
        assert!(!link_accepts(
            &link_rec,
            &unit_with(&["secret"], SourceType::Document)
        ));
        link_rec.filters.exclude_tags.clear();
        assert!(link_accepts(
            &link_rec,
            &unit_with(&["secret"], SourceType::Document)
        ));
    }
}
