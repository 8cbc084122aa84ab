//! Typed operation boundary.
//!
//! Every externally triggered operation enters the engine as an
//! [`OpRequest`] variant with a fully typed payload, validated before any
//! work starts. Each operation kind is handled by an independent agent
//! implementing [`RequestAgent`]; agents share no base state. The
//! [`AgentRegistry`] owns one agent per operation family and is built
//! explicitly by the entry point with its dependencies passed in, so there
//! is no process-wide registry or lazily initialized global.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::assemble_context;
use crate::ingest::{IngestError, IngestionPipeline};
use crate::models::{ChangeRecord, IngestOutcome, RetrievalOutcome, SourceMetadata};
use crate::retrieval::{RetrievalEngine, RetrievalError, RetrievalOptions};

/// Closed set of operations the engine accepts.
#[derive(Debug, Clone)]
pub enum OpRequest {
    Retrieve {
        tenant_id: String,
        query: String,
        max_results: Option<usize>,
    },
    Ingest {
        tenant_id: String,
        text: String,
        metadata: SourceMetadata,
    },
    Retire {
        tenant_id: String,
        source_id: String,
    },
    AssembleContext {
        tenant_id: String,
        query: String,
        budget_chars: usize,
        max_results: Option<usize>,
    },
}

impl OpRequest {
    /// Stable operation name, for logs and error messages.
    pub fn op_name(&self) -> &'static str {
        match self {
            OpRequest::Retrieve { .. } => "retrieve",
            OpRequest::Ingest { .. } => "ingest",
            OpRequest::Retire { .. } => "retire",
            OpRequest::AssembleContext { .. } => "assemble-context",
        }
    }

    fn tenant_id(&self) -> &str {
        match self {
            OpRequest::Retrieve { tenant_id, .. }
            | OpRequest::Ingest { tenant_id, .. }
            | OpRequest::Retire { tenant_id, .. }
            | OpRequest::AssembleContext { tenant_id, .. } => tenant_id,
        }
    }
}

/// Result payload per operation kind.
#[derive(Debug)]
pub enum OpResponse {
    Retrieved(RetrievalOutcome),
    Ingested(IngestOutcome),
    Retired(ChangeRecord),
    Context {
        block: String,
        outcome: RetrievalOutcome,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request failed boundary validation and was never processed.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// The request reached an agent that does not handle its operation.
    #[error("agent '{agent}' does not handle operation '{operation}'")]
    Unsupported {
        agent: &'static str,
        operation: &'static str,
    },
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Ingestion(#[from] IngestError),
}

/// Liveness report for one agent.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub agent: &'static str,
    pub ready: bool,
    pub detail: String,
}

/// One operation family's handler. Implementations are independent structs
/// holding only the collaborators they need.
#[async_trait]
pub trait RequestAgent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap structural checks, run before [`process`](Self::process).
    fn validate(&self, request: &OpRequest) -> Result<(), RequestError>;

    async fn process(&self, request: OpRequest) -> Result<OpResponse, RequestError>;

    async fn health(&self) -> HealthStatus;
}

fn require(ok: bool, message: &str) -> Result<(), RequestError> {
    if ok {
        Ok(())
    } else {
        Err(RequestError::Invalid(message.to_string()))
    }
}

fn unsupported(agent: &'static str, request: &OpRequest) -> RequestError {
    RequestError::Unsupported {
        agent,
        operation: request.op_name(),
    }
}

// ============ Retrieval ============

pub struct RetrievalAgent {
    engine: Arc<RetrievalEngine>,
}

impl RetrievalAgent {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl RequestAgent for RetrievalAgent {
    fn name(&self) -> &'static str {
        "retrieval"
    }

    fn validate(&self, request: &OpRequest) -> Result<(), RequestError> {
        match request {
            OpRequest::Retrieve {
                tenant_id,
                query,
                max_results,
            } => {
                require(!tenant_id.trim().is_empty(), "tenant_id must not be empty")?;
                require(!query.trim().is_empty(), "query must not be empty")?;
                require(
                    max_results.map_or(true, |n| n > 0),
                    "max_results must be positive",
                )
            }
            other => Err(unsupported(self.name(), other)),
        }
    }

    async fn process(&self, request: OpRequest) -> Result<OpResponse, RequestError> {
        self.validate(&request)?;
        match request {
            OpRequest::Retrieve {
                tenant_id,
                query,
                max_results,
            } => {
                let outcome = self
                    .engine
                    .retrieve(&tenant_id, &query, RetrievalOptions { max_results })
                    .await?;
                Ok(OpResponse::Retrieved(outcome))
            }
            other => Err(unsupported(self.name(), &other)),
        }
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            agent: self.name(),
            ready: true,
            detail: format!("embedding model: {}", self.engine.model_name()),
        }
    }
}

// ============ Ingestion ============

pub struct IngestionAgent {
    pipeline: Arc<IngestionPipeline>,
}

impl IngestionAgent {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl RequestAgent for IngestionAgent {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    fn validate(&self, request: &OpRequest) -> Result<(), RequestError> {
        match request {
            OpRequest::Ingest {
                tenant_id,
                metadata,
                ..
            } => {
                require(!tenant_id.trim().is_empty(), "tenant_id must not be empty")?;
                require(
                    !metadata.source_id.trim().is_empty(),
                    "source_id must not be empty",
                )
            }
            OpRequest::Retire {
                tenant_id,
                source_id,
            } => {
                require(!tenant_id.trim().is_empty(), "tenant_id must not be empty")?;
                require(!source_id.trim().is_empty(), "source_id must not be empty")
            }
            other => Err(unsupported(self.name(), other)),
        }
    }

    async fn process(&self, request: OpRequest) -> Result<OpResponse, RequestError> {
        self.validate(&request)?;
        match request {
            OpRequest::Ingest {
                tenant_id,
                text,
                metadata,
            } => {
                let outcome = self.pipeline.ingest(&tenant_id, &text, metadata).await?;
                Ok(OpResponse::Ingested(outcome))
            }
            OpRequest::Retire {
                tenant_id,
                source_id,
            } => {
                let record = self.pipeline.retire(&tenant_id, &source_id).await?;
                Ok(OpResponse::Retired(record))
            }
            other => Err(unsupported(self.name(), &other)),
        }
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            agent: self.name(),
            ready: true,
            detail: "ok".into(),
        }
    }
}

// ============ Context assembly ============

pub struct ContextAgent {
    engine: Arc<RetrievalEngine>,
}

impl ContextAgent {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl RequestAgent for ContextAgent {
    fn name(&self) -> &'static str {
        "context"
    }

    fn validate(&self, request: &OpRequest) -> Result<(), RequestError> {
        match request {
            OpRequest::AssembleContext {
                tenant_id,
                query,
                budget_chars,
                ..
            } => {
                require(!tenant_id.trim().is_empty(), "tenant_id must not be empty")?;
                require(!query.trim().is_empty(), "query must not be empty")?;
                require(*budget_chars > 0, "budget_chars must be positive")
            }
            other => Err(unsupported(self.name(), other)),
        }
    }

    async fn process(&self, request: OpRequest) -> Result<OpResponse, RequestError> {
        self.validate(&request)?;
        match request {
            OpRequest::AssembleContext {
                tenant_id,
                query,
                budget_chars,
                max_results,
            } => {
                let outcome = self
                    .engine
                    .retrieve(&tenant_id, &query, RetrievalOptions { max_results })
                    .await?;
                let block = assemble_context(&tenant_id, &outcome.results, budget_chars);
                Ok(OpResponse::Context { block, outcome })
            }
            other => Err(unsupported(self.name(), &other)),
        }
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            agent: self.name(),
            ready: true,
            detail: "ok".into(),
        }
    }
}

// ============ Registry ============

/// Explicitly constructed routing table: one agent per operation family.
///
/// Built once at startup with its dependencies injected; call sites receive
/// a reference rather than reaching for a global.
pub struct AgentRegistry {
    retrieval: RetrievalAgent,
    ingestion: IngestionAgent,
    context: ContextAgent,
}

impl AgentRegistry {
    pub fn new(engine: Arc<RetrievalEngine>, pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            retrieval: RetrievalAgent::new(Arc::clone(&engine)),
            ingestion: IngestionAgent::new(pipeline),
            context: ContextAgent::new(engine),
        }
    }

    fn agent_for(&self, request: &OpRequest) -> &dyn RequestAgent {
        match request {
            OpRequest::Retrieve { .. } => &self.retrieval,
            OpRequest::Ingest { .. } | OpRequest::Retire { .. } => &self.ingestion,
            OpRequest::AssembleContext { .. } => &self.context,
        }
    }

    /// Validate and route one request to its agent.
    pub async fn dispatch(&self, request: OpRequest) -> Result<OpResponse, RequestError> {
        let agent = self.agent_for(&request);
        debug!(
            agent = agent.name(),
            operation = request.op_name(),
            tenant = request.tenant_id(),
            "dispatching request"
        );
        agent.validate(&request)?;
        agent.process(request).await
    }

    /// Health of every registered agent.
    pub async fn health(&self) -> Vec<HealthStatus> {
        vec![
            self.retrieval.health().await,
            self.ingestion.health().await,
            self.context.health().await,
        ]
    }
}
