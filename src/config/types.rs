// Configuration type definitions

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::job::DEFAULT_LOCATION;

/// Default BigQuery v2 REST root
pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

/// Upper bound on jobs one executor keeps in flight at once
fn default_max_concurrent_jobs() -> usize {
    16
}

/// Long-poll window passed to `getQueryResults`
fn default_poll_timeout_ms() -> u64 {
    10_000
}

fn default_result_page_size() -> u32 {
    1000
}

/// How long to keep waiting for the backend after a local cancel
fn default_cancel_grace_ms() -> u64 {
    30_000
}

fn default_listing_page_size() -> u32 {
    100
}

/// Which backend the shared client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Rest,
    Simulated,
}

/// Client identity and transport
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Project billed for jobs (falls back to the key's project)
    pub project_id: Option<String>,
    /// Service account key path; ambient credentials when unset
    pub credentials: Option<PathBuf>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub token_uri: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            project_id: None,
            credentials: None,
            location: default_location(),
            backend: BackendKind::default(),
            endpoint: default_endpoint(),
            token_uri: None,
        }
    }
}

/// Query execution tuning
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_result_page_size")]
    pub page_size: u32,
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

impl QueryConfig {
    /// Server-side wait per results poll; never shorter than 1 ms
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            poll_timeout_ms: default_poll_timeout_ms(),
            page_size: default_result_page_size(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

/// Metadata listing section
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_listing_page_size")]
    pub page_size: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        ListingConfig {
            page_size: default_listing_page_size(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub listing: ListingConfig,
}
