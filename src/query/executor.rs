//! Query execution on the shared client
//!
//! [`QueryExecutor::run`] registers the job for cancellation, takes a slot
//! from the concurrency bound, submits through the [`ClientHandle`] and
//! waits for a terminal state, then streams the rows. Every error ends up in
//! the returned [`QueryOutcome`]; nothing escapes to the caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cancel::JobRegistry;
use super::streamer::{self, LogSink, ResultStreamer, RowSink};
use super::QueryOutcome;
use crate::client::{CancelStatus, ClientHandle, RowStream};
use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::job::{JobId, QueryRequest};

/// Pause between cancels of a job the backend does not know yet
const CANCEL_RETRY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    client: Arc<ClientHandle>,
    registry: Arc<JobRegistry>,
    permits: Arc<Semaphore>,
    interrupt: CancellationToken,
    cancel_grace: Duration,
}

impl QueryExecutor {
    pub fn new(client: Arc<ClientHandle>, registry: Arc<JobRegistry>, config: &QueryConfig) -> Self {
        Self {
            client,
            registry,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            interrupt: CancellationToken::new(),
            cancel_grace: config.cancel_grace(),
        }
    }

    /// Use `interrupt` as the root token; tripping it fails every wait
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt_token(&self) -> &CancellationToken {
        &self.interrupt
    }

    pub fn client(&self) -> &Arc<ClientHandle> {
        &self.client
    }

    /// Run a query to its terminal outcome, logging every row
    pub async fn run(
        &self,
        query: &str,
        job_id: JobId,
        fetch_delay: Option<Duration>,
    ) -> QueryOutcome {
        self.run_into(query, job_id, fetch_delay, &mut LogSink).await
    }

    /// Run a query to its terminal outcome, delivering rows to `sink`
    pub async fn run_into(
        &self,
        query: &str,
        job_id: JobId,
        fetch_delay: Option<Duration>,
        sink: &mut dyn RowSink,
    ) -> QueryOutcome {
        let request = QueryRequest::new(query, job_id);
        let job_id = request.job_id();
        let guard = self.registry.register(job_id);
        let cancel = guard.token();

        log::info!("Running query with JobId: {}", job_id.job);
        log::debug!("Query text for {}: {}", job_id, request.query());

        // Waiting for a slot is itself cancellable
        let _permit = tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => {
                return finish(job_id, QueryOutcome::Failed(QueryError::Interrupted(
                    "interrupted while waiting for a job slot".to_string(),
                )));
            }
            _ = cancel.cancelled() => {
                log::info!("Query {} cancelled before submission", job_id.job);
                return finish(job_id, QueryOutcome::Cancelled);
            }
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return finish(job_id, QueryOutcome::Failed(QueryError::Interrupted(
                        "executor shut down".to_string(),
                    )));
                }
            },
        };

        let rows = match self.await_job(&request, cancel).await {
            Ok(rows) => rows,
            Err(QueryError::Cancelled) => return finish(job_id, QueryOutcome::Cancelled),
            Err(e) => return finish(job_id, QueryOutcome::Failed(e)),
        };

        if let Some(schema) = rows.schema() {
            log::info!(
                "Query {} results ({} columns, {} rows):",
                job_id.job,
                schema.fields.len(),
                rows.total_rows().unwrap_or(0)
            );
        }

        ResultStreamer::new(fetch_delay)
            .stream(job_id, rows.into_stream(), cancel, &self.interrupt, sink)
            .await
    }

    /// Submit and wait for the job, honouring local cancellation
    ///
    /// The insert always runs to completion. Once the local token trips the
    /// backend is asked to stop the job, again while it answers `NotFound`,
    /// and the wait continues for at most the cancel grace period.
    async fn await_job<'c>(
        &'c self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<RowStream<'c>, QueryError> {
        let job_id = request.job_id();
        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => return Err(interrupted()),
            inserted = self.client.insert(request) => inserted?,
        }

        let wait = self.client.wait_for_job(job_id);
        tokio::pin!(wait);

        if !cancel.is_cancelled() {
            tokio::select! {
                biased;
                _ = self.interrupt.cancelled() => return Err(interrupted()),
                result = &mut wait => return result,
                _ = cancel.cancelled() => {}
            }
        }

        let stop = self.stop_job(job_id);
        tokio::pin!(stop);
        let grace = tokio::time::sleep(self.cancel_grace);
        tokio::pin!(grace);
        let mut stop_sent = false;

        loop {
            tokio::select! {
                biased;
                _ = self.interrupt.cancelled() => return Err(interrupted()),
                result = &mut wait => return result,
                _ = &mut stop, if !stop_sent => stop_sent = true,
                _ = &mut grace => {
                    log::warn!(
                        "Backend did not confirm cancellation of {} within {:?}",
                        job_id,
                        self.cancel_grace
                    );
                    return Err(QueryError::Cancelled);
                }
            }
        }
    }

    /// Send the backend cancel until it knows the job
    async fn stop_job(&self, job_id: &JobId) {
        loop {
            match self.client.cancel(job_id).await {
                CancelStatus::NotFound => {
                    log::debug!("Job {} not visible yet, retrying cancel", job_id);
                    tokio::time::sleep(CANCEL_RETRY).await;
                }
                status => {
                    log::debug!("Backend answered cancel of {} with {:?}", job_id, status);
                    return;
                }
            }
        }
    }

    /// Run the query on its own task, logging rows
    pub fn spawn(
        &self,
        query: impl Into<String>,
        job_id: JobId,
        fetch_delay: Option<Duration>,
    ) -> QueryTask<LogSink> {
        self.spawn_into(query, job_id, fetch_delay, LogSink)
    }

    /// Run the query on its own task, handing the sink back on completion
    pub fn spawn_into<K>(
        &self,
        query: impl Into<String>,
        job_id: JobId,
        fetch_delay: Option<Duration>,
        mut sink: K,
    ) -> QueryTask<K>
    where
        K: RowSink + 'static,
    {
        let executor = self.clone();
        let query = query.into();
        let task_job = job_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = executor
                .run_into(&query, task_job, fetch_delay, &mut sink)
                .await;
            (outcome, sink)
        });
        QueryTask { job_id, handle }
    }
}

fn interrupted() -> QueryError {
    QueryError::Interrupted("interrupted while waiting for the job".to_string())
}

fn finish(job_id: &JobId, outcome: QueryOutcome) -> QueryOutcome {
    streamer::report(job_id, &outcome, 0);
    outcome
}

/// Handle to a query running on its own task
#[derive(Debug)]
pub struct QueryTask<K = LogSink> {
    job_id: JobId,
    handle: JoinHandle<(QueryOutcome, K)>,
}

impl<K> QueryTask<K> {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Drop the task without telling the backend; prefer a cancel request
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> QueryOutcome {
        self.finish().await.0
    }

    /// Wait for the terminal outcome and take the sink back
    ///
    /// An aborted or panicked task yields `Failed(Interrupted)` and no sink.
    pub async fn finish(self) -> (QueryOutcome, Option<K>) {
        match self.handle.await {
            Ok((outcome, sink)) => (outcome, Some(sink)),
            Err(e) if e.is_cancelled() => {
                log::warn!("Query task for {} was aborted", self.job_id.job);
                (
                    QueryOutcome::Failed(QueryError::Interrupted("query task aborted".to_string())),
                    None,
                )
            }
            Err(e) => {
                log::error!("Query task for {} panicked: {}", self.job_id.job, e);
                (
                    QueryOutcome::Failed(QueryError::Interrupted(format!(
                        "query task panicked: {}",
                        e
                    ))),
                    None,
                )
            }
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;
