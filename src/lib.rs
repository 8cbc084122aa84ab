//! # Knowledge Mesh
//!
//! A cross-tenant retrieval and context-assembly engine for multi-tenant
//! knowledge platforms.
//!
//! Knowledge Mesh stores each tenant's content in an isolated store,
//! chunked and embedded at ingestion time. Explicit, admin-approved links
//! let one tenant's queries fan out into other tenants' stores; results
//! are filtered, weighted, merged, and ranked deterministically, then
//! assembled into a budget-bounded, attributed context block for answer
//! generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────┐
//! │  Ingest  │──▶│  Chunk+Embed  │──▶│  SQLite  │
//! │  (text)  │   │   Pipeline    │   │  per-    │
//! └──────────┘   └───────────────┘   │  tenant  │
//!                                    └────┬─────┘
//!                ┌───────────────┐        │
//!   query ──────▶│   Retrieval   │◀───────┤
//!                │ fan-out+merge │   links │
//!                └──────┬────────┘        │
//!                       ▼            ┌────┴─────┐
//!                ┌──────────────┐    │   Link   │
//!                │   Context    │    │ Registry │
//!                │  Assembler   │    └──────────┘
//!                └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kmesh init                                  # create database
//! kmesh ingest --tenant acme --source handbook doc.txt
//! kmesh link add --from acme --to partner
//! kmesh link approve <link-id>
//! kmesh query --tenant acme "onboarding process"
//! kmesh query --tenant acme "onboarding process" --assemble
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Lossless, restartable text chunking |
//! | [`embedding`] | Embedding provider abstraction and gateway |
//! | [`vector`] | Embedding blobs and cosine similarity |
//! | [`store`] | Per-tenant content persistence |
//! | [`links`] | Cross-tenant link lifecycle and filters |
//! | [`ingest`] | Ingestion pipeline and change detection |
//! | [`retrieval`] | Cross-tenant fan-out search, merge, and rank |
//! | [`context`] | Budget-bounded context assembly |
//! | [`registry`] | Typed operation boundary and agent registry |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod links;
pub mod migrate;
pub mod models;
pub mod registry;
pub mod retrieval;
pub mod store;
pub mod vector;
