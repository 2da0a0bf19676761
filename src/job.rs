//! Job identifiers and query requests
//!
//! A [`JobId`] correlates a submitted query with a later cancel request.
//! It is a plain value: any holder of a copy may cancel the job.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default BigQuery multi-region for jobs
pub const DEFAULT_LOCATION: &str = "US";

/// Location-scoped job identifier
///
/// Two ids with the same token but different locations address different jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub job: String,
    pub location: String,
}

impl JobId {
    /// Generate a fresh client-side job id scoped to `location`
    pub fn new_random(location: impl Into<String>) -> Self {
        Self {
            job: format!("bqprobe_{}", Uuid::new_v4().simple()),
            location: location.into(),
        }
    }

    pub fn of(job: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location, self.job)
    }
}

/// A query bound to the job id it will run under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    query: String,
    job_id: JobId,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, job_id: JobId) -> Self {
        Self {
            query: query.into(),
            job_id,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}
