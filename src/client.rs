//! Shared BigQuery client handle
//!
//! One [`ClientHandle`] is built per process and shared by reference
//! (`Arc<ClientHandle>`) between every query runner and canceller. It is
//! immutable after construction; the backends keep whatever connection state
//! they need internally synchronised, so no caller-side locking is required.

mod model;
mod rest;
mod simulated;
mod stream;
mod wire;

use std::time::Duration;

use reqwest::Client;

pub use model::{
    DatasetRef, FieldSchema, FieldValue, Page, ResultsPage, Row, TableRef, TableSchema,
};
pub use rest::RestBackend;
pub use simulated::{ScriptedQuery, SimulatedBackend};
pub use stream::RowStream;

use crate::auth::{Credentials, TokenSource};
use crate::config::{BackendKind, ClientConfig, QueryConfig};
use crate::error::{CredentialError, QueryError};
use crate::job::{JobId, QueryRequest};

/// Project used by the simulated backend when none is configured
pub const SIMULATED_PROJECT: &str = "simulated-project";

/// Answer to a cancel request
///
/// Only says whether the backend accepted the signal, not whether the job
/// actually stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelStatus {
    /// The backend accepted the cancel for a job that was still running
    Requested,
    /// The job had already finished; nothing changed
    AlreadyTerminal,
    /// The backend does not know the job (yet)
    NotFound,
    /// The cancel call itself failed
    Rejected(String),
}

impl CancelStatus {
    pub fn accepted(&self) -> bool {
        matches!(self, CancelStatus::Requested)
    }
}

/// Backend implementations behind the shared handle
#[derive(Debug)]
pub enum Backend {
    /// BigQuery v2 REST API
    Rest(RestBackend),
    /// In-process job table
    Simulated(SimulatedBackend),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Rest(_) => "rest",
            Backend::Simulated(_) => "simulated",
        }
    }
}

#[derive(Debug)]
pub struct ClientHandle {
    backend: Backend,
    project_id: String,
    poll_timeout: Duration,
    page_size: u32,
}

impl ClientHandle {
    pub fn new(backend: Backend, project_id: impl Into<String>, query: &QueryConfig) -> Self {
        Self {
            backend,
            project_id: project_id.into(),
            poll_timeout: query.poll_timeout(),
            page_size: query.page_size.max(1),
        }
    }

    /// Handle over a fresh simulated backend
    pub fn simulated(project_id: impl Into<String>, query: &QueryConfig) -> Self {
        Self::new(
            Backend::Simulated(SimulatedBackend::new()),
            project_id,
            query,
        )
    }

    /// Build the handle from configuration, authenticating once
    ///
    /// Uses the configured key file when present, otherwise ambient
    /// credentials. The project id falls back to the one in the key.
    pub fn connect(client: &ClientConfig, query: &QueryConfig) -> Result<Self, CredentialError> {
        match client.backend {
            BackendKind::Simulated => Ok(Self::simulated(
                client
                    .project_id
                    .clone()
                    .unwrap_or_else(|| SIMULATED_PROJECT.to_string()),
                query,
            )),
            BackendKind::Rest => {
                let credentials = match &client.credentials {
                    Some(path) => Credentials::from_file(path)?,
                    None => Credentials::from_env()?,
                };
                let project_id = client
                    .project_id
                    .clone()
                    .or_else(|| credentials.project_id().map(str::to_string))
                    .ok_or_else(|| {
                        CredentialError::Malformed(
                            "no project id configured and the key does not name one".to_string(),
                        )
                    })?;

                let http = Client::new();
                let tokens = TokenSource::new(http.clone(), &credentials, client.token_uri.as_deref())?;
                log::info!(
                    "Authenticated as {} for project {}",
                    credentials.client_email(),
                    project_id
                );
                Ok(Self::new(
                    Backend::Rest(RestBackend::new(http, client.endpoint.clone(), tokens)),
                    project_id,
                    query,
                ))
            }
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// The simulated backend, for seeding scripts and fixtures
    pub fn as_simulated(&self) -> Option<&SimulatedBackend> {
        match &self.backend {
            Backend::Simulated(sim) => Some(sim),
            Backend::Rest(_) => None,
        }
    }

    /// Submit a query and wait until its job is terminal
    ///
    /// Returns the lazy row sequence on success. A job stopped by a cancel
    /// comes back as [`QueryError::Cancelled`], anything else the backend
    /// reports as [`QueryError::Backend`].
    pub async fn submit(&self, request: &QueryRequest) -> Result<RowStream<'_>, QueryError> {
        self.insert(request).await?;
        self.wait_for_job(request.job_id()).await
    }

    /// Create the job; once this returns the backend knows its id
    pub async fn insert(&self, request: &QueryRequest) -> Result<(), QueryError> {
        let inserted = match &self.backend {
            Backend::Rest(rest) => rest.insert_job(&self.project_id, request).await,
            Backend::Simulated(sim) => sim.insert_job(&self.project_id, request).await,
        };
        inserted.map_err(classify)?;
        log::debug!("Job {} inserted", request.job_id());
        Ok(())
    }

    /// Poll an inserted job until it is terminal
    pub async fn wait_for_job(&self, job_id: &JobId) -> Result<RowStream<'_>, QueryError> {
        loop {
            let page = self.query_results(job_id, None).await?;
            if page.job_complete {
                log::debug!(
                    "Job {} complete, {} rows total",
                    job_id,
                    page.total_rows.unwrap_or(0)
                );
                return Ok(RowStream::new(self, job_id.clone(), page));
            }
            log::debug!("Job {} still running", job_id);
            tokio::task::yield_now().await;
        }
    }

    pub(crate) async fn fetch_page(
        &self,
        job_id: &JobId,
        page_token: &str,
    ) -> Result<ResultsPage, QueryError> {
        self.query_results(job_id, Some(page_token)).await
    }

    async fn query_results(
        &self,
        job_id: &JobId,
        page_token: Option<&str>,
    ) -> Result<ResultsPage, QueryError> {
        let page = match &self.backend {
            Backend::Rest(rest) => {
                rest.query_results(
                    &self.project_id,
                    job_id,
                    page_token,
                    self.page_size,
                    self.poll_timeout,
                )
                .await
            }
            Backend::Simulated(sim) => {
                sim.query_results(job_id, page_token, self.page_size, self.poll_timeout)
                    .await
            }
        };
        page.map_err(classify)
    }

    /// Ask the backend to cancel a job
    ///
    /// Never fails: unknown or finished jobs and failed calls are reported
    /// through the returned status.
    pub async fn cancel(&self, job_id: &JobId) -> CancelStatus {
        let result = match &self.backend {
            Backend::Rest(rest) => rest.cancel_job(&self.project_id, job_id).await,
            Backend::Simulated(sim) => sim.cancel_job(job_id).await,
        };
        result.unwrap_or_else(|e| CancelStatus::Rejected(e.to_string()))
    }

    /// All datasets of `project_id`, following pagination
    pub async fn list_datasets(
        &self,
        project_id: &str,
        page_size: u32,
    ) -> Result<Vec<DatasetRef>, QueryError> {
        let mut all = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = match &self.backend {
                Backend::Rest(rest) => {
                    rest.list_datasets_page(project_id, page_size, token.as_deref())
                        .await?
                }
                Backend::Simulated(sim) => {
                    sim.list_datasets_page(project_id, page_size, token.as_deref())
                        .await?
                }
            };
            all.extend(page.items);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(all),
            }
        }
    }

    /// All tables of a dataset in the handle's project, following pagination
    pub async fn list_tables(
        &self,
        dataset_id: &str,
        page_size: u32,
    ) -> Result<Vec<TableRef>, QueryError> {
        let mut all = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = match &self.backend {
                Backend::Rest(rest) => {
                    rest.list_tables_page(&self.project_id, dataset_id, page_size, token.as_deref())
                        .await?
                }
                Backend::Simulated(sim) => {
                    sim.list_tables_page(&self.project_id, dataset_id, page_size, token.as_deref())
                        .await?
                }
            };
            all.extend(page.items);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(all),
            }
        }
    }

    /// Schema of a table; `None` when the table has no schema (e.g. views being created)
    pub async fn get_table_schema(
        &self,
        table: &TableRef,
    ) -> Result<Option<TableSchema>, QueryError> {
        match &self.backend {
            Backend::Rest(rest) => rest.get_table_schema(table).await,
            Backend::Simulated(sim) => sim.get_table_schema(table).await,
        }
    }
}

/// Map a backend-reported stop into the dedicated cancellation error
fn classify(err: QueryError) -> QueryError {
    if err.is_cancellation() {
        QueryError::Cancelled
    } else {
        err
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
