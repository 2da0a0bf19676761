//! JSON bodies of the BigQuery v2 REST API

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::TableSchema;
use crate::error::QueryError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobInsert<'a> {
    pub job_reference: JobReference<'a>,
    pub configuration: JobConfiguration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobReference<'a> {
    pub project_id: &'a str,
    pub job_id: &'a str,
    pub location: &'a str,
}

#[derive(Serialize)]
pub(crate) struct JobConfiguration<'a> {
    pub query: QueryJobConfiguration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryJobConfiguration<'a> {
    pub query: &'a str,
    pub use_legacy_sql: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobResource {
    #[serde(default)]
    pub status: Option<JobStatus>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error_result: Option<ErrorProto>,
}

#[derive(Deserialize)]
pub(crate) struct CancelResponse {
    #[serde(default)]
    pub job: Option<JobResource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryResultsResponse {
    #[serde(default)]
    pub job_complete: bool,
    #[serde(default)]
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub page_token: Option<String>,
    /// int64 values are sent as JSON strings
    #[serde(default)]
    pub total_rows: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetList {
    #[serde(default)]
    pub datasets: Vec<DatasetListEntry>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetListEntry {
    pub dataset_reference: DatasetReference,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetReference {
    pub project_id: String,
    pub dataset_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableList {
    #[serde(default)]
    pub tables: Vec<TableListEntry>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableListEntry {
    pub table_reference: TableReference,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Deserialize)]
pub(crate) struct TableResource {
    #[serde(default)]
    pub schema: Option<TableSchema>,
}

#[derive(Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

#[derive(Deserialize, Clone)]
pub(crate) struct ErrorProto {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorProto {
    pub fn into_query_error(self, code: Option<u16>) -> QueryError {
        QueryError::Backend {
            code,
            reason: self.reason,
            message: self.message.unwrap_or_else(|| "Unknown error".to_string()),
        }
    }
}

/// Decode an error body, falling back to the raw text when it is not JSON
pub(crate) fn decode_error(status: u16, body: &str) -> QueryError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let reason = envelope.error.errors.first().and_then(|e| e.reason.clone());
            QueryError::Backend {
                code: envelope.error.code.or(Some(status)),
                reason,
                message: envelope.error.message,
            }
        }
        Err(_) => QueryError::Backend {
            code: Some(status),
            reason: None,
            message: if body.trim().is_empty() {
                "Unknown error".to_string()
            } else {
                body.trim().to_string()
            },
        },
    }
}
