//! Query execution, cancellation and row streaming over the shared client

pub mod cancel;
pub mod executor;
pub mod streamer;

use std::sync::Arc;

pub use cancel::{CancellationCoordinator, JobRegistry, RunGuard};
pub use executor::{QueryExecutor, QueryTask};
pub use streamer::{CollectSink, LogSink, ResultStreamer, RowSink};

use crate::client::ClientHandle;
use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::job::JobId;

/// Terminal result of one submitted query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Every row was delivered to the sink, in order
    Completed { rows: u64 },
    Cancelled,
    Failed(QueryError),
}

impl QueryOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, QueryOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryOutcome::Cancelled)
    }

    /// Short label for summaries
    pub fn label(&self) -> String {
        match self {
            QueryOutcome::Completed { rows } => format!("completed ({} rows)", rows),
            QueryOutcome::Cancelled => "cancelled".to_string(),
            QueryOutcome::Failed(e) => format!("failed: {}", e),
        }
    }
}

/// Executor and canceller wired to one client and one job registry
#[derive(Debug, Clone)]
pub struct QueryService {
    executor: QueryExecutor,
    canceller: CancellationCoordinator,
    location: String,
}

impl QueryService {
    pub fn new(client: Arc<ClientHandle>, config: &QueryConfig, location: impl Into<String>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        Self {
            executor: QueryExecutor::new(Arc::clone(&client), Arc::clone(&registry), config),
            canceller: CancellationCoordinator::new(client, registry),
            location: location.into(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: tokio_util::sync::CancellationToken) -> Self {
        self.executor = self.executor.with_interrupt(interrupt);
        self
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn canceller(&self) -> &CancellationCoordinator {
        &self.canceller
    }

    pub fn client(&self) -> &Arc<ClientHandle> {
        self.executor.client()
    }

    /// Fresh job id in the configured location
    pub fn new_job_id(&self) -> JobId {
        JobId::new_random(self.location.clone())
    }
}
