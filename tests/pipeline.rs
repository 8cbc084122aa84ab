//! End-to-end pipeline tests: ingest into isolated tenant stores, link
//! them, retrieve across the mesh, and assemble context. Runs against a
//! file-backed database with the deterministic mock embedding provider.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use knowledge_mesh::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, LinksConfig, RetrievalConfig,
};
use knowledge_mesh::context::NO_CONTEXT_MARKER;
use knowledge_mesh::embedding::{EmbeddingGateway, MockEmbedder};
use knowledge_mesh::ingest::IngestionPipeline;
use knowledge_mesh::links::{LinkRegistry, NewLink};
use knowledge_mesh::models::{AccessLevel, LinkFilters, SourceMetadata, SourceType};
use knowledge_mesh::registry::{AgentRegistry, OpRequest, OpResponse};
use knowledge_mesh::retrieval::RetrievalEngine;
use knowledge_mesh::store::SqliteStore;
use knowledge_mesh::{db, migrate};

struct Mesh {
    _tmp: TempDir,
    registry: AgentRegistry,
    links: LinkRegistry,
}

fn test_config(db_path: PathBuf) -> Config {
    Config {
        db: DbConfig { path: db_path },
        chunking: ChunkingConfig { max_chars: 512 },
        embedding: EmbeddingConfig {
            dims: 16,
            retry_base_ms: 1,
            ..Default::default()
        },
        retrieval: RetrievalConfig::default(),
        links: LinksConfig::default(),
    }
}

async fn mesh() -> Mesh {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(tmp.path().join("data/mesh.sqlite"));

    let pool = db::connect(&cfg).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let links = Arc::new(LinkRegistry::new(pool.clone()));
    let gateway = Arc::new(EmbeddingGateway::new(
        Arc::new(MockEmbedder::new(16)),
        &cfg.embedding,
    ));

    let engine = Arc::new(RetrievalEngine::new(
        store.clone(),
        links,
        gateway.clone(),
        cfg.retrieval.clone(),
    ));
    let pipeline = Arc::new(IngestionPipeline::new(store, gateway, &cfg.chunking));

    Mesh {
        _tmp: tmp,
        registry: AgentRegistry::new(engine, pipeline),
        links: LinkRegistry::new(pool),
    }
}

async fn ingest(mesh: &Mesh, tenant: &str, source: &str, text: &str, tags: &[&str]) {
    let response = mesh
        .registry
        .dispatch(OpRequest::Ingest {
            tenant_id: tenant.into(),
            text: text.into(),
            metadata: SourceMetadata {
                source_id: source.into(),
                source_type: SourceType::Document,
                title: Some(source.to_string()),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        })
        .await
        .unwrap();
    assert!(matches!(response, OpResponse::Ingested(_)));
}

async fn link(mesh: &Mesh, from: &str, to: &str, weight: f64, filters: LinkFilters) -> String {
    let link = mesh
        .links
        .create_link(
            NewLink {
                source_tenant_id: from.into(),
                target_tenant_id: to.into(),
                access_level: AccessLevel::SearchOnly,
                filters,
                weight,
                max_results: 10,
                // Mock vectors for unrelated texts can score slightly
                // negative; disable the threshold unless a test sets one.
                min_similarity: -1.0,
                expires_at: None,
            },
            false,
        )
        .await
        .unwrap();
    link.id
}

async fn retrieve(mesh: &Mesh, tenant: &str, query: &str) -> Vec<(String, String, f64)> {
    let response = mesh
        .registry
        .dispatch(OpRequest::Retrieve {
            tenant_id: tenant.into(),
            query: query.into(),
            max_results: None,
        })
        .await
        .unwrap();
    let OpResponse::Retrieved(outcome) = response else {
        panic!("expected Retrieved");
    };
    outcome
        .results
        .into_iter()
        .map(|r| (r.origin_tenant_id, r.text, r.weighted_score))
        .collect()
}

const SHARED_TEXT: &str = "Quarterly onboarding checklist for new engineers.";
const SECRET_TEXT: &str = "Internal compensation bands, strictly confidential.";

#[tokio::test]
async fn test_tenants_are_isolated_without_links() {
    let mesh = mesh().await;
    ingest(&mesh, "acme", "doc", SHARED_TEXT, &[]).await;
    ingest(&mesh, "partner", "doc", SECRET_TEXT, &[]).await;

    let results = retrieve(&mesh, "acme", SHARED_TEXT).await;
    assert!(!results.is_empty());
    assert!(results.iter().all(|(origin, _, _)| origin == "acme"));
}

#[tokio::test]
async fn test_pending_link_contributes_nothing_until_approved() {
    let mesh = mesh().await;
    ingest(&mesh, "acme", "own", "Acme engineering wiki home page.", &[]).await;
    ingest(&mesh, "partner", "doc", SHARED_TEXT, &[]).await;

    let link_id = link(&mesh, "acme", "partner", 1.0, LinkFilters::default()).await;

    let results = retrieve(&mesh, "acme", SHARED_TEXT).await;
    assert!(results.iter().all(|(origin, _, _)| origin == "acme"));

    mesh.links.approve(&link_id).await.unwrap();
    let results = retrieve(&mesh, "acme", SHARED_TEXT).await;
    assert!(results.iter().any(|(origin, _, _)| origin == "partner"));
}

#[tokio::test]
async fn test_link_weight_ranks_own_copy_above_linked_copy() {
    let mesh = mesh().await;
    // Identical text in both stores: raw similarity ties, weight decides.
    ingest(&mesh, "acme", "doc", SHARED_TEXT, &[]).await;
    ingest(&mesh, "partner", "doc", SHARED_TEXT, &[]).await;

    let link_id = link(&mesh, "acme", "partner", 0.5, LinkFilters::default()).await;
    mesh.links.approve(&link_id).await.unwrap();

    let results = retrieve(&mesh, "acme", SHARED_TEXT).await;
    assert_eq!(results[0].0, "acme");
    let partner = results.iter().find(|(o, _, _)| o == "partner").unwrap();
    assert!((results[0].2 - 2.0 * partner.2).abs() < 1e-6);
}

#[tokio::test]
async fn test_exclude_tag_filter_hides_linked_units() {
    let mesh = mesh().await;
    ingest(&mesh, "acme", "own", "Acme home page.", &[]).await;
    ingest(&mesh, "partner", "public", SHARED_TEXT, &["public"]).await;
    ingest(&mesh, "partner", "secret", SECRET_TEXT, &["confidential"]).await;

    let filters = LinkFilters {
        exclude_tags: vec!["confidential".into()],
        ..Default::default()
    };
    let link_id = link(&mesh, "acme", "partner", 1.0, filters).await;
    mesh.links.approve(&link_id).await.unwrap();

    // Query with the secret's exact text: without the filter it would rank
    // first from partner's store.
    let results = retrieve(&mesh, "acme", SECRET_TEXT).await;
    assert!(results.iter().all(|(_, text, _)| text != SECRET_TEXT));

    let results = retrieve(&mesh, "acme", SHARED_TEXT).await;
    assert!(results.iter().any(|(_, text, _)| text == SHARED_TEXT));
}

#[tokio::test]
async fn test_suspension_takes_effect_immediately() {
    let mesh = mesh().await;
    ingest(&mesh, "acme", "own", "Acme home page.", &[]).await;
    ingest(&mesh, "partner", "doc", SHARED_TEXT, &[]).await;

    let link_id = link(&mesh, "acme", "partner", 1.0, LinkFilters::default()).await;
    mesh.links.approve(&link_id).await.unwrap();
    assert!(retrieve(&mesh, "acme", SHARED_TEXT)
        .await
        .iter()
        .any(|(o, _, _)| o == "partner"));

    mesh.links.suspend(&link_id).await.unwrap();
    assert!(retrieve(&mesh, "acme", SHARED_TEXT)
        .await
        .iter()
        .all(|(o, _, _)| o == "acme"));
}

#[tokio::test]
async fn test_reingest_replaces_search_results_with_new_version() {
    let mesh = mesh().await;
    let old_text = "The deployment runbook, edition one.";
    let new_text = "The deployment runbook, fully rewritten second edition.";

    ingest(&mesh, "acme", "runbook", old_text, &[]).await;
    ingest(&mesh, "acme", "runbook", new_text, &[]).await;

    let results = retrieve(&mesh, "acme", old_text).await;
    assert!(results.iter().all(|(_, text, _)| text != old_text));
    assert!(results.iter().any(|(_, text, _)| text == new_text));
}

#[tokio::test]
async fn test_assembled_context_attributes_linked_results() {
    let mesh = mesh().await;
    ingest(&mesh, "acme", "own", SHARED_TEXT, &[]).await;
    ingest(&mesh, "partner", "doc", SHARED_TEXT, &[]).await;

    let link_id = link(&mesh, "acme", "partner", 0.5, LinkFilters::default()).await;
    mesh.links.approve(&link_id).await.unwrap();

    let response = mesh
        .registry
        .dispatch(OpRequest::AssembleContext {
            tenant_id: "acme".into(),
            query: SHARED_TEXT.into(),
            budget_chars: 10_000,
            max_results: None,
        })
        .await
        .unwrap();
    let OpResponse::Context { block, .. } = response else {
        panic!("expected Context");
    };
    assert!(block.contains("(own knowledge base)"));
    assert!(block.contains("(linked: partner)"));
    assert_ne!(block, NO_CONTEXT_MARKER);
}

#[tokio::test]
async fn test_retire_then_query_finds_nothing() {
    let mesh = mesh().await;
    ingest(&mesh, "acme", "doc", SHARED_TEXT, &[]).await;

    mesh.registry
        .dispatch(OpRequest::Retire {
            tenant_id: "acme".into(),
            source_id: "doc".into(),
        })
        .await
        .unwrap();

    let results = retrieve(&mesh, "acme", SHARED_TEXT).await;
    assert!(results.is_empty());
}
