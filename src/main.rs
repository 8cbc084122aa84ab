//! # Knowledge Mesh CLI (`kmesh`)
//!
//! The `kmesh` binary is the operational interface for Knowledge Mesh. It
//! provides commands for database initialization, content ingestion,
//! cross-tenant link administration, retrieval, and context assembly.
//!
//! ## Usage
//!
//! ```bash
//! kmesh --config ./config/kmesh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kmesh init` | Create the SQLite database and run schema migrations |
//! | `kmesh ingest` | Chunk, embed, and index a source for a tenant |
//! | `kmesh retire` | Deactivate a source's active version |
//! | `kmesh history` | Show a source's change history |
//! | `kmesh query` | Retrieve ranked results (optionally assembled context) |
//! | `kmesh link add` | Request a link from one tenant to another |
//! | `kmesh link approve` | Activate a pending link |
//! | `kmesh link suspend` | Suspend an active link |
//! | `kmesh link reject` | Reject a pending link |
//! | `kmesh link list` | List a tenant's links |
//! | `kmesh link sweep` | Suspend expired links |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! kmesh init --config ./config/kmesh.toml
//!
//! # Ingest a document for tenant "acme"
//! kmesh ingest --tenant acme --source handbook --title "Handbook" docs/handbook.txt
//!
//! # Let acme search partner's store at half weight
//! kmesh link add --from acme --to partner --weight 0.5
//! kmesh link approve <link-id>
//!
//! # Query and assemble a 4000-character context block
//! kmesh query --tenant acme "onboarding process" --assemble --budget 4000
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use knowledge_mesh::config::{self, Config};
use knowledge_mesh::embedding::{create_embedder, EmbeddingGateway};
use knowledge_mesh::ingest::IngestionPipeline;
use knowledge_mesh::links::{LinkRegistry, NewLink};
use knowledge_mesh::models::{
    AccessLevel, LinkFilters, RetrievalOutcome, SourceMetadata, SourceType,
};
use knowledge_mesh::registry::{AgentRegistry, OpRequest, OpResponse};
use knowledge_mesh::retrieval::RetrievalEngine;
use knowledge_mesh::store::SqliteStore;
use knowledge_mesh::{db, migrate};

/// Knowledge Mesh CLI — cross-tenant retrieval and context assembly for
/// multi-tenant knowledge platforms.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kmesh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kmesh",
    about = "Knowledge Mesh — cross-tenant retrieval and context assembly",
    version,
    long_about = "Knowledge Mesh stores each tenant's content in an isolated, embedded store and \
    lets explicitly linked tenants search each other's knowledge bases. Results are filtered, \
    weighted, merged, and ranked deterministically, then assembled into budget-bounded context."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kmesh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (content_units, knowledge_links, change_records). Idempotent.
    Init,

    /// Chunk, embed, and index a source's full text for a tenant.
    ///
    /// Reads the text from FILE (or stdin when omitted). Re-ingesting the
    /// same source compares content hashes: unchanged text is a no-op,
    /// changed text produces a new version and a change record. Prior
    /// versions are kept inactive, never deleted.
    Ingest {
        /// Tenant that owns the content.
        #[arg(long)]
        tenant: String,

        /// Stable source identifier (document id, page URL, ...).
        #[arg(long)]
        source: String,

        /// Source kind: `document` or `web-page`.
        #[arg(long, default_value = "document")]
        r#type: String,

        /// Human-readable title attached to every chunk.
        #[arg(long)]
        title: Option<String>,

        /// Tags used by link filters. Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// File containing the source text; stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Deactivate a source's active version and record the deletion.
    Retire {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        source: String,
    },

    /// Show a source's change history, oldest first.
    History {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        source: String,
    },

    /// Retrieve ranked results for a query.
    ///
    /// Searches the tenant's own store plus every store reachable through
    /// an active link. Linked stores that fail or exceed the query deadline
    /// are reported as unreachable without failing the query.
    Query {
        /// Tenant issuing the query.
        #[arg(long)]
        tenant: String,

        /// The query text.
        query: String,

        /// Maximum number of results (defaults to `[retrieval].global_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Assemble results into an attributed context block instead of
        /// listing them.
        #[arg(long)]
        assemble: bool,

        /// Context budget in characters (with `--assemble`).
        #[arg(long, default_value_t = 4000)]
        budget: usize,
    },

    /// Manage cross-tenant links.
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },
}

/// Link administration subcommands.
#[derive(Subcommand)]
enum LinkAction {
    /// Request a link letting FROM search TO's store.
    ///
    /// The link starts `pending` and contributes nothing until approved,
    /// unless `[links].auto_approve` is set. Weight, result cap, and
    /// similarity threshold default from the `[links]` config section.
    Add {
        /// Tenant that will issue queries.
        #[arg(long)]
        from: String,

        /// Tenant whose store is exposed.
        #[arg(long)]
        to: String,

        /// Multiplier applied to raw similarity of this link's results.
        #[arg(long)]
        weight: Option<f64>,

        /// Per-link result cap, applied before the global cap.
        #[arg(long)]
        max_results: Option<usize>,

        /// Raw similarity threshold; lower-scoring results are dropped.
        #[arg(long)]
        min_similarity: Option<f64>,

        /// Only expose units carrying one of these tags. Repeatable.
        #[arg(long = "include-tag")]
        include_tags: Vec<String>,

        /// Never expose units carrying one of these tags. Repeatable.
        #[arg(long = "exclude-tag")]
        exclude_tags: Vec<String>,

        /// Unix timestamp after which the link stops contributing.
        #[arg(long)]
        expires_at: Option<i64>,
    },

    /// Activate a pending link.
    Approve {
        /// Link UUID.
        id: String,
    },

    /// Suspend an active link, removing it from future queries.
    Suspend {
        /// Link UUID.
        id: String,
    },

    /// Reject a pending link.
    Reject {
        /// Link UUID.
        id: String,
    },

    /// List all links where the tenant is source or target.
    List {
        #[arg(long)]
        tenant: String,
    },

    /// Flip expired active links to suspended.
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            tenant,
            source,
            r#type,
            title,
            tags,
            file,
        } => {
            let source_type = SourceType::parse(&r#type)
                .with_context(|| format!("unknown source type '{}'", r#type))?;
            let text = read_input(file.as_deref())?;

            let registry = build_registry(&cfg).await?;
            let response = registry
                .dispatch(OpRequest::Ingest {
                    tenant_id: tenant,
                    text,
                    metadata: SourceMetadata {
                        source_id: source,
                        source_type,
                        title,
                        tags,
                    },
                })
                .await?;

            if let OpResponse::Ingested(outcome) = response {
                match outcome.change_records.first() {
                    Some(record) => println!(
                        "{}: {} unit(s), change {:.1}%",
                        record.change_type.as_str(),
                        outcome.unit_ids.len(),
                        record.change_pct * 100.0
                    ),
                    None => println!("unchanged: no-op"),
                }
            }
        }
        Commands::Retire { tenant, source } => {
            let registry = build_registry(&cfg).await?;
            registry
                .dispatch(OpRequest::Retire {
                    tenant_id: tenant,
                    source_id: source.clone(),
                })
                .await?;
            println!("Retired source '{}'.", source);
        }
        Commands::History { tenant, source } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteStore::new(pool);
            use knowledge_mesh::store::ContentStore;
            let records = store.change_records(&tenant, &source).await?;
            if records.is_empty() {
                println!("No change records for '{}'.", source);
            }
            for record in records {
                println!(
                    "{}  {:<16} {:>6.1}%  {} -> {}",
                    record.created_at,
                    record.change_type.as_str(),
                    record.change_pct * 100.0,
                    short_hash(&record.old_hash),
                    short_hash(&record.new_hash),
                );
            }
        }
        Commands::Query {
            tenant,
            query,
            limit,
            assemble,
            budget,
        } => {
            let registry = build_registry(&cfg).await?;
            if assemble {
                let response = registry
                    .dispatch(OpRequest::AssembleContext {
                        tenant_id: tenant,
                        query,
                        budget_chars: budget,
                        max_results: limit,
                    })
                    .await?;
                if let OpResponse::Context { block, outcome } = response {
                    println!("{}", block);
                    print_unreachable(&outcome);
                }
            } else {
                let response = registry
                    .dispatch(OpRequest::Retrieve {
                        tenant_id: tenant.clone(),
                        query,
                        max_results: limit,
                    })
                    .await?;
                if let OpResponse::Retrieved(outcome) = response {
                    if outcome.results.is_empty() {
                        println!("No results.");
                    }
                    for (i, r) in outcome.results.iter().enumerate() {
                        let origin = if r.is_own(&tenant) {
                            "own".to_string()
                        } else {
                            format!("via {}", r.origin_tenant_id)
                        };
                        println!(
                            "{:>2}. [{:.3}] ({}) {}",
                            i + 1,
                            r.weighted_score,
                            origin,
                            r.title.as_deref().unwrap_or(&r.unit_id),
                        );
                    }
                    print_unreachable(&outcome);
                }
            }
        }
        Commands::Link { action } => {
            let pool = db::connect(&cfg).await?;
            let links = LinkRegistry::new(pool);
            match action {
                LinkAction::Add {
                    from,
                    to,
                    weight,
                    max_results,
                    min_similarity,
                    include_tags,
                    exclude_tags,
                    expires_at,
                } => {
                    let link = links
                        .create_link(
                            NewLink {
                                source_tenant_id: from,
                                target_tenant_id: to,
                                access_level: AccessLevel::SearchOnly,
                                filters: LinkFilters {
                                    include_tags,
                                    exclude_tags,
                                    ..Default::default()
                                },
                                weight: weight.unwrap_or(cfg.links.default_weight),
                                max_results: max_results.unwrap_or(cfg.links.default_max_results),
                                min_similarity: min_similarity
                                    .unwrap_or(cfg.links.default_min_similarity),
                                expires_at,
                            },
                            cfg.links.auto_approve,
                        )
                        .await?;
                    println!("Created link {} ({}).", link.id, link.status.as_str());
                }
                LinkAction::Approve { id } => {
                    links.approve(&id).await?;
                    println!("Link {} approved.", id);
                }
                LinkAction::Suspend { id } => {
                    links.suspend(&id).await?;
                    println!("Link {} suspended.", id);
                }
                LinkAction::Reject { id } => {
                    links.reject(&id).await?;
                    println!("Link {} rejected.", id);
                }
                LinkAction::List { tenant } => {
                    let all = links.list_for_tenant(&tenant).await?;
                    if all.is_empty() {
                        println!("No links for tenant '{}'.", tenant);
                    }
                    for link in all {
                        println!(
                            "{}  {:<9} {} -> {}  weight={} max={} min_sim={}",
                            link.id,
                            link.status.as_str(),
                            link.source_tenant_id,
                            link.target_tenant_id,
                            link.weight,
                            link.max_results,
                            link.min_similarity,
                        );
                    }
                }
                LinkAction::Sweep => {
                    let n = links.sweep_expired().await?;
                    println!("Suspended {} expired link(s).", n);
                }
            }
        }
    }

    Ok(())
}

/// Wire the full engine: store, link registry, embedding gateway,
/// retrieval engine, ingestion pipeline, and the agent registry on top.
async fn build_registry(cfg: &Config) -> Result<AgentRegistry> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let links = Arc::new(LinkRegistry::new(pool));
    let gateway = Arc::new(EmbeddingGateway::new(
        create_embedder(&cfg.embedding)?,
        &cfg.embedding,
    ));

    let engine = Arc::new(RetrievalEngine::new(
        store.clone(),
        links,
        gateway.clone(),
        cfg.retrieval.clone(),
    ));
    let pipeline = Arc::new(IngestionPipeline::new(store, gateway, &cfg.chunking));

    Ok(AgentRegistry::new(engine, pipeline))
}

fn read_input(file: Option<&std::path::Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display())),
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn print_unreachable(outcome: &RetrievalOutcome) {
    if !outcome.unreachable_sources.is_empty() {
        eprintln!(
            "warning: unreachable sources: {}",
            outcome.unreachable_sources.join(", ")
        );
    }
}

fn short_hash(hash: &str) -> &str {
    if hash.is_empty() {
        "-"
    } else {
        &hash[..hash.len().min(8)]
    }
}
