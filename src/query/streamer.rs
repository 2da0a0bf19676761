//! Row consumption with cooperative cancellation
//!
//! Pulls rows from a lazy result sequence, hands each to a [`RowSink`] and
//! optionally sleeps between rows. The cancel and interrupt tokens are
//! checked before every row and during every pause.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::QueryOutcome;
use crate::client::Row;
use crate::error::QueryError;
use crate::job::JobId;

/// Destination for delivered rows
pub trait RowSink: Send {
    fn accept(&mut self, job_id: &JobId, row: &Row);
}

/// Writes every row to the log, as `Query columns: N` followed by the values
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl RowSink for LogSink {
    fn accept(&mut self, job_id: &JobId, row: &Row) {
        log::info!("[{}] Query columns: {}", job_id.job, row.len());
        log::info!("[{}] {}", job_id.job, row);
    }
}

/// Keeps rows in memory
#[derive(Debug, Default, Clone)]
pub struct CollectSink {
    pub rows: Vec<Row>,
}

impl RowSink for CollectSink {
    fn accept(&mut self, _job_id: &JobId, row: &Row) {
        self.rows.push(row.clone());
    }
}

enum Step {
    Next(Option<Result<Row, QueryError>>),
    Stop(QueryOutcome),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResultStreamer {
    fetch_delay: Option<Duration>,
}

impl ResultStreamer {
    pub fn new(fetch_delay: Option<Duration>) -> Self {
        Self {
            fetch_delay: fetch_delay.filter(|delay| !delay.is_zero()),
        }
    }

    /// Drain `rows` into `sink` until the sequence ends or a token trips
    ///
    /// The returned outcome is also logged. Iteration errors end the stream:
    /// a backend stop becomes `Cancelled`, anything else `Failed`.
    pub async fn stream<S>(
        &self,
        job_id: &JobId,
        rows: S,
        cancel: &CancellationToken,
        interrupt: &CancellationToken,
        sink: &mut dyn RowSink,
    ) -> QueryOutcome
    where
        S: Stream<Item = Result<Row, QueryError>>,
    {
        let mut rows = std::pin::pin!(rows);
        let mut delivered: u64 = 0;

        let outcome = loop {
            let step = tokio::select! {
                biased;
                _ = interrupt.cancelled() => Step::Stop(interrupted("reading rows")),
                _ = cancel.cancelled() => Step::Stop(QueryOutcome::Cancelled),
                next = rows.next() => Step::Next(next),
            };

            match step {
                Step::Stop(outcome) => break outcome,
                Step::Next(None) => break QueryOutcome::Completed { rows: delivered },
                Step::Next(Some(Err(QueryError::Cancelled))) => break QueryOutcome::Cancelled,
                Step::Next(Some(Err(e))) => break QueryOutcome::Failed(e),
                Step::Next(Some(Ok(row))) => {
                    sink.accept(job_id, &row);
                    delivered += 1;
                }
            }

            if let Some(delay) = self.fetch_delay {
                let paused = tokio::select! {
                    biased;
                    _ = interrupt.cancelled() => Some(interrupted("pausing between rows")),
                    _ = cancel.cancelled() => Some(QueryOutcome::Cancelled),
                    _ = tokio::time::sleep(delay) => None,
                };
                if let Some(outcome) = paused {
                    break outcome;
                }
            }
        };

        report(job_id, &outcome, delivered);
        outcome
    }
}

fn interrupted(during: &str) -> QueryOutcome {
    QueryOutcome::Failed(QueryError::Interrupted(format!("interrupted while {}", during)))
}

pub(crate) fn report(job_id: &JobId, outcome: &QueryOutcome, delivered: u64) {
    match outcome {
        QueryOutcome::Completed { rows } => {
            log::info!("Query {} performed successfully, {} rows", job_id.job, rows)
        }
        QueryOutcome::Cancelled => {
            log::info!("Query {} cancelled after {} rows", job_id.job, delivered)
        }
        QueryOutcome::Failed(QueryError::Interrupted(why)) => {
            log::warn!("Query {} interrupted: {}", job_id.job, why)
        }
        QueryOutcome::Failed(e) => log::error!("Query {} not performed \n{}", job_id.job, e),
    }
}
