use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent — safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Versioned content units; embeddings stored as little-endian f32 BLOBs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_units (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_type TEXT NOT NULL DEFAULT 'document',
            chunk_index INTEGER NOT NULL,
            title TEXT,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            active INTEGER NOT NULL DEFAULT 1,
            content_hash TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(tenant_id, source_id, version, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Cross-tenant access records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_links (
            id TEXT PRIMARY KEY,
            source_tenant_id TEXT NOT NULL,
            target_tenant_id TEXT NOT NULL,
            access_level TEXT NOT NULL DEFAULT 'search-only',
            include_tags TEXT NOT NULL DEFAULT '[]',
            exclude_tags TEXT NOT NULL DEFAULT '[]',
            include_types TEXT NOT NULL DEFAULT '[]',
            exclude_types TEXT NOT NULL DEFAULT '[]',
            weight REAL NOT NULL DEFAULT 1.0,
            max_results INTEGER NOT NULL DEFAULT 5,
            min_similarity REAL NOT NULL DEFAULT 0.0,
            status TEXT NOT NULL DEFAULT 'pending',
            expires_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one *active* link per (source, target) pair
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_links_one_active
        ON knowledge_links(source_tenant_id, target_tenant_id)
        WHERE status = 'active'
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only change log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS change_records (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            old_hash TEXT NOT NULL DEFAULT '',
            new_hash TEXT NOT NULL,
            change_pct REAL NOT NULL,
            change_type TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_units_tenant_active ON content_units(tenant_id, active)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_units_source ON content_units(tenant_id, source_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_links_source ON knowledge_links(source_tenant_id, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_changes_source ON change_records(tenant_id, source_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
