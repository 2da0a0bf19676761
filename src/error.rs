use std::path::PathBuf;

use thiserror::Error;

/// Failures while acquiring credentials for the shared client.
///
/// These are the only errors allowed to abort startup.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Cannot read credentials file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed credentials: {0}")]
    Malformed(String),

    #[error("Ambient credentials not configured: {0}")]
    MissingAmbient(String),

    #[error("Access token exchange failed: {0}")]
    TokenExchange(String),
}

/// Errors raised while submitting a query or iterating its rows
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueryError {
    /// Query malformed, job rejected, or transport failure
    #[error("Backend error{}: {message}", fmt_code(.code, .reason))]
    Backend {
        code: Option<u16>,
        reason: Option<String>,
        message: String,
    },

    /// The wait for a terminal state was interrupted before the backend answered
    #[error("Query interrupted: {0}")]
    Interrupted(String),

    /// The job was cancelled, either by the backend or cooperatively
    #[error("Query cancelled")]
    Cancelled,
}

fn fmt_code(code: &Option<u16>, reason: &Option<String>) -> String {
    match (code, reason) {
        (Some(code), Some(reason)) => format!(" ({code} {reason})"),
        (Some(code), None) => format!(" ({code})"),
        (None, Some(reason)) => format!(" ({reason})"),
        (None, None) => String::new(),
    }
}

impl QueryError {
    pub fn backend(message: impl Into<String>) -> Self {
        QueryError::Backend {
            code: None,
            reason: None,
            message: message.into(),
        }
    }

    pub fn transport(err: reqwest::Error) -> Self {
        QueryError::Backend {
            code: err.status().map(|s| s.as_u16()),
            reason: Some("transport".to_string()),
            message: err.to_string(),
        }
    }

    /// True for the error BigQuery reports when a job was stopped by a cancel
    pub fn is_cancellation(&self) -> bool {
        match self {
            QueryError::Cancelled => true,
            QueryError::Backend { reason, .. } => reason.as_deref() == Some("stopped"),
            QueryError::Interrupted(_) => false,
        }
    }
}
