//! BigQuery v2 REST backend
//!
//! Talks to `jobs`, `queries`, `datasets` and `tables` endpoints with reqwest.
//! Holds no per-job state: everything about a job lives on the server and is
//! addressed by its [`JobId`], so one instance serves any number of callers.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode, Url};

use super::wire::{
    CancelResponse, DatasetList, JobConfiguration, JobInsert, JobReference, JobResource,
    QueryJobConfiguration, QueryResultsResponse, TableList, TableResource, decode_error,
};
use super::{CancelStatus, DatasetRef, Page, ResultsPage, Row, TableRef, TableSchema};
use crate::auth::TokenSource;
use crate::error::QueryError;
use crate::job::{JobId, QueryRequest};

/// Extra slack on top of the server-side long-poll window
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct RestBackend {
    http: Client,
    endpoint: String,
    tokens: TokenSource,
}

impl RestBackend {
    pub fn new(http: Client, endpoint: impl Into<String>, tokens: TokenSource) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, QueryError> {
        let mut url = Url::parse(&format!("{}/{}", self.endpoint, path))
            .map_err(|e| QueryError::backend(format!("invalid endpoint: {}", e)))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send_get(&self, url: Url, timeout: Option<Duration>) -> Result<Response, QueryError> {
        let token = self.tokens.access_token().await?;
        let mut request = self.http.get(url).bearer_auth(token);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout + HTTP_TIMEOUT_SLACK);
        }
        request.send().await.map_err(QueryError::transport)
    }

    async fn send_post(&self, url: Url, body: String) -> Result<Response, QueryError> {
        let token = self.tokens.access_token().await?;
        self.http
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(QueryError::transport)
    }

    pub(crate) async fn insert_job(
        &self,
        project_id: &str,
        request: &QueryRequest,
    ) -> Result<(), QueryError> {
        let job_id = request.job_id();
        let body = JobInsert {
            job_reference: JobReference {
                project_id,
                job_id: &job_id.job,
                location: &job_id.location,
            },
            configuration: JobConfiguration {
                query: QueryJobConfiguration {
                    query: request.query(),
                    use_legacy_sql: false,
                },
            },
        };
        let body = serde_json::to_string(&body).map_err(|e| QueryError::backend(e.to_string()))?;

        let url = self.url(&format!("projects/{}/jobs", project_id), &[])?;
        let response = checked(self.send_post(url, body).await?).await?;

        let job: JobResource = response.json().await.map_err(QueryError::transport)?;
        match job.status.and_then(|s| s.error_result) {
            Some(error) => Err(error.into_query_error(None)),
            None => Ok(()),
        }
    }

    pub(crate) async fn query_results(
        &self,
        project_id: &str,
        job_id: &JobId,
        page_token: Option<&str>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<ResultsPage, QueryError> {
        let mut params = vec![
            ("location", job_id.location.clone()),
            ("timeoutMs", timeout.as_millis().to_string()),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let url = self.url(
            &format!("projects/{}/queries/{}", project_id, job_id.job),
            &params,
        )?;
        let response = checked(self.send_get(url, Some(timeout)).await?).await?;

        let body: QueryResultsResponse = response.json().await.map_err(QueryError::transport)?;
        Ok(ResultsPage {
            job_complete: body.job_complete,
            schema: body.schema,
            rows: body.rows.iter().map(Row::from_json).collect(),
            page_token: body.page_token,
            total_rows: body.total_rows.and_then(|n| n.parse().ok()),
        })
    }

    pub(crate) async fn cancel_job(
        &self,
        project_id: &str,
        job_id: &JobId,
    ) -> Result<CancelStatus, QueryError> {
        let url = self.url(
            &format!("projects/{}/jobs/{}/cancel", project_id, job_id.job),
            &[("location", job_id.location.clone())],
        )?;
        let response = self.send_post(url, String::new()).await?;
        let code = response.status().as_u16();
        let body = response.text().await.map_err(QueryError::transport)?;
        cancel_status(code, &body)
    }

    pub(crate) async fn list_datasets_page(
        &self,
        project_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<Page<DatasetRef>, QueryError> {
        let url = self.url(
            &format!("projects/{}/datasets", project_id),
            &list_params(page_size, page_token),
        )?;
        let response = checked(self.send_get(url, None).await?).await?;
        let body: DatasetList = response.json().await.map_err(QueryError::transport)?;

        Ok(Page {
            items: body
                .datasets
                .into_iter()
                .map(|d| DatasetRef {
                    project_id: d.dataset_reference.project_id,
                    dataset_id: d.dataset_reference.dataset_id,
                    friendly_name: d.friendly_name,
                })
                .collect(),
            next_page_token: body.next_page_token,
        })
    }

    pub(crate) async fn list_tables_page(
        &self,
        project_id: &str,
        dataset_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<Page<TableRef>, QueryError> {
        let url = self.url(
            &format!("projects/{}/datasets/{}/tables", project_id, dataset_id),
            &list_params(page_size, page_token),
        )?;
        let response = checked(self.send_get(url, None).await?).await?;
        let body: TableList = response.json().await.map_err(QueryError::transport)?;

        Ok(Page {
            items: body
                .tables
                .into_iter()
                .map(|t| TableRef {
                    project_id: t.table_reference.project_id,
                    dataset_id: t.table_reference.dataset_id,
                    table_id: t.table_reference.table_id,
                })
                .collect(),
            next_page_token: body.next_page_token,
        })
    }

    pub(crate) async fn get_table_schema(
        &self,
        table: &TableRef,
    ) -> Result<Option<TableSchema>, QueryError> {
        let url = self.url(
            &format!(
                "projects/{}/datasets/{}/tables/{}",
                table.project_id, table.dataset_id, table.table_id
            ),
            &[],
        )?;
        let response = checked(self.send_get(url, None).await?).await?;
        let body: TableResource = response.json().await.map_err(QueryError::transport)?;
        Ok(body.schema)
    }
}

fn list_params(page_size: u32, page_token: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![("maxResults", page_size.to_string())];
    if let Some(token) = page_token {
        params.push(("pageToken", token.to_string()));
    }
    params
}

/// Interpret the answer to `jobs.cancel`
fn cancel_status(code: u16, body: &str) -> Result<CancelStatus, QueryError> {
    if code == StatusCode::NOT_FOUND.as_u16() {
        return Ok(CancelStatus::NotFound);
    }
    if !(200..300).contains(&code) {
        return Err(decode_error(code, body));
    }
    let parsed: CancelResponse = serde_json::from_str(body)
        .map_err(|e| QueryError::backend(format!("invalid cancel response: {}", e)))?;
    let state = parsed.job.and_then(|j| j.status).and_then(|s| s.state);
    Ok(match state.as_deref() {
        Some("DONE") => CancelStatus::AlreadyTerminal,
        _ => CancelStatus::Requested,
    })
}

/// Turn a non-success HTTP response into a [`QueryError::Backend`]
async fn checked(response: Response) -> Result<Response, QueryError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let code = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(decode_error(code, &body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_with_token() {
        let params = list_params(100, Some("next"));
        assert_eq!(
            params,
            vec![
                ("maxResults", "100".to_string()),
                ("pageToken", "next".to_string())
            ]
        );
    }

    #[test]
    fn test_list_params_without_token() {
        assert_eq!(list_params(5, None), vec![("maxResults", "5".to_string())]);
    }

    #[test]
    fn test_cancel_not_found() {
        let status = cancel_status(404, r#"{"error":{"code":404,"message":"Not found: Job p:US.j"}}"#);
        assert_eq!(status.unwrap(), CancelStatus::NotFound);
    }

    #[test]
    fn test_cancel_of_finished_job_is_already_terminal() {
        let body = r#"{"kind":"bigquery#jobCancelResponse","job":{"status":{"state":"DONE"}}}"#;
        assert_eq!(cancel_status(200, body).unwrap(), CancelStatus::AlreadyTerminal);
    }

    #[test]
    fn test_cancel_of_running_job_is_requested() {
        let body = r#"{"job":{"status":{"state":"RUNNING"}}}"#;
        assert_eq!(cancel_status(200, body).unwrap(), CancelStatus::Requested);
        assert_eq!(cancel_status(200, "{}").unwrap(), CancelStatus::Requested);
    }

    #[test]
    fn test_cancel_error_envelope_is_backend_error() {
        let body = r#"{"error":{"code":403,"message":"Access Denied","errors":[{"reason":"accessDenied"}]}}"#;
        match cancel_status(403, body) {
            Err(QueryError::Backend { code, reason, message }) => {
                assert_eq!(code, Some(403));
                assert_eq!(reason.as_deref(), Some("accessDenied"));
                assert_eq!(message, "Access Denied");
            }
            other => panic!("Expected backend error, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_garbage_body_is_an_error() {
        assert!(cancel_status(200, "<html>").is_err());
    }
}
