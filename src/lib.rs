//! bqprobe library - concurrent BigQuery jobs over one shared client
//!
//! One [`client::ClientHandle`] is shared by every query runner and
//! canceller. Queries run through [`query::QueryExecutor`], can be cancelled
//! by job id from any task through [`query::CancellationCoordinator`], and
//! stream their rows to a [`query::RowSink`].

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod metadata;
pub mod query;
pub mod scenarios;

// Re-export commonly used types for convenience
pub use client::{CancelStatus, ClientHandle};
pub use config::Config;
pub use error::{CredentialError, QueryError};
pub use job::{JobId, QueryRequest};
pub use query::{CancellationCoordinator, QueryExecutor, QueryOutcome, QueryService};
