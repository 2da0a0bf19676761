//! Lazy, forward-only sequence of result rows

use std::collections::VecDeque;

use futures::Stream;

use super::{ClientHandle, ResultsPage, Row, TableSchema};
use crate::error::QueryError;
use crate::job::JobId;

/// Rows of one completed job, fetched page by page on demand
///
/// Not restartable: once a page fetch fails the stream yields that error and
/// then ends.
#[derive(Debug)]
pub struct RowStream<'a> {
    client: &'a ClientHandle,
    job_id: JobId,
    schema: Option<TableSchema>,
    total_rows: Option<u64>,
    buffered: VecDeque<Row>,
    page_token: Option<String>,
}

impl<'a> RowStream<'a> {
    pub(crate) fn new(client: &'a ClientHandle, job_id: JobId, first_page: ResultsPage) -> Self {
        Self {
            client,
            job_id,
            schema: first_page.schema,
            total_rows: first_page.total_rows,
            buffered: first_page.rows.into(),
            page_token: first_page.page_token,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn schema(&self) -> Option<&TableSchema> {
        self.schema.as_ref()
    }

    /// Row count reported by the backend for the whole result set
    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }

    /// Next row, fetching the following page when the buffer runs dry
    pub async fn next_row(&mut self) -> Option<Result<Row, QueryError>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Some(Ok(row));
            }
            let token = self.page_token.take()?;

            log::debug!("Fetching next page of job {}", self.job_id);
            match self.client.fetch_page(&self.job_id, &token).await {
                Ok(page) => {
                    if self.schema.is_none() {
                        self.schema = page.schema;
                    }
                    self.buffered.extend(page.rows);
                    self.page_token = page.page_token;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Row, QueryError>> + 'a {
        futures::stream::unfold(self, |mut rows| async move {
            let item = rows.next_row().await?;
            Some((item, rows))
        })
    }
}
