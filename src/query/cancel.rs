//! Cancellation coordination between query runners and cancellers
//!
//! A runner registers its [`JobId`] before submitting and gets a
//! [`CancellationToken`] back. A canceller, from any task, trips that token
//! and asks the backend to stop the job. Neither side needs to know which
//! task the other runs on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::client::{CancelStatus, ClientHandle};
use crate::job::JobId;

/// A job's shared token and how many local runs hold it
#[derive(Debug)]
struct Entry {
    token: CancellationToken,
    runs: usize,
}

/// Jobs currently held by at least one local runner
#[derive(Debug, Default)]
pub struct JobRegistry {
    running: Mutex<HashMap<JobId, Entry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a run of `job_id`; it is deregistered when the guard drops
    ///
    /// Runs registered under the same id share one token, and the id stays
    /// registered until the last of their guards drops.
    pub fn register(self: &Arc<Self>, job_id: &JobId) -> RunGuard {
        let mut running = self.lock();
        let entry = running.entry(job_id.clone()).or_insert_with(|| Entry {
            token: CancellationToken::new(),
            runs: 0,
        });
        entry.runs += 1;
        RunGuard {
            registry: Arc::clone(self),
            job_id: job_id.clone(),
            token: entry.token.clone(),
        }
    }

    fn release(&self, job_id: &JobId) {
        let mut running = self.lock();
        if let Some(entry) = running.get_mut(job_id) {
            entry.runs -= 1;
            if entry.runs == 0 {
                running.remove(job_id);
            }
        }
    }

    /// Trip the local token of `job_id`; false when no runner holds it
    pub fn signal(&self, job_id: &JobId) -> bool {
        match self.lock().get(job_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: &JobId) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Registration of one local run
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<JobRegistry>,
    job_id: JobId,
    token: CancellationToken,
}

impl RunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.release(&self.job_id);
    }
}

/// Requests cancellation of jobs by identifier
#[derive(Debug, Clone)]
pub struct CancellationCoordinator {
    client: Arc<ClientHandle>,
    registry: Arc<JobRegistry>,
}

impl CancellationCoordinator {
    pub fn new(client: Arc<ClientHandle>, registry: Arc<JobRegistry>) -> Self {
        Self { client, registry }
    }

    /// Cancel `job_id`, wherever it runs
    ///
    /// Returns true when a local runner was signalled or the backend accepted
    /// the cancel. Unknown and finished jobs return false; nothing is raised.
    pub async fn request_cancel(&self, job_id: &JobId) -> bool {
        let status = self.cancel_status(job_id).await;
        let signalled = self.registry.signal(job_id);
        signalled || status.accepted()
    }

    /// Ask the backend only, reporting its detailed answer
    pub async fn cancel_status(&self, job_id: &JobId) -> CancelStatus {
        let status = self.client.cancel(job_id).await;
        match &status {
            CancelStatus::Requested => log::info!("Cancel requested for job {}", job_id.job),
            CancelStatus::AlreadyTerminal => {
                log::info!("Job {} already finished, nothing to cancel", job_id.job)
            }
            CancelStatus::NotFound => {
                log::info!("Job {} not known to the backend yet", job_id.job)
            }
            CancelStatus::Rejected(message) => {
                log::warn!("Query cancel failed \n{}", message)
            }
        }
        status
    }
}
