//! In-process backend with BigQuery job semantics
//!
//! Used for offline runs and for exercising the concurrency contract without
//! a network. Jobs live in a table keyed by [`JobId`]; each runs for its
//! scripted duration on the tokio clock, can be cancelled while running, and
//! pages its rows like `getQueryResults` does.
//!
//! The table sits behind a std mutex that is never held across an await.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{CancelStatus, DatasetRef, FieldSchema, FieldValue, Page, ResultsPage, Row, TableRef, TableSchema};
use crate::error::QueryError;
use crate::job::{JobId, QueryRequest};

/// Scripted answer for one query text
#[derive(Debug, Clone, Default)]
pub struct ScriptedQuery {
    schema: TableSchema,
    rows: Vec<Row>,
    run_time: Duration,
    failure: Option<QueryError>,
}

impl ScriptedQuery {
    pub fn rows(schema: TableSchema, rows: Vec<Row>) -> Self {
        Self {
            schema,
            rows,
            ..Self::default()
        }
    }

    /// A query that fails after its run time with `error`
    pub fn failing(error: QueryError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn running_for(mut self, run_time: Duration) -> Self {
        self.run_time = run_time;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SimJobState {
    Running,
    Done,
    Cancelled,
    Failed(QueryError),
}

#[derive(Debug)]
struct SimJob {
    script: ScriptedQuery,
    state: SimJobState,
    deadline: Instant,
    /// Cancels before this instant answer `NotFound`
    visible_at: Instant,
    stop: CancellationToken,
}

impl SimJob {
    /// Settle a running job whose deadline has passed
    fn settle(&mut self, now: Instant) {
        if self.state == SimJobState::Running && now >= self.deadline {
            self.state = match &self.script.failure {
                Some(error) => SimJobState::Failed(error.clone()),
                None => SimJobState::Done,
            };
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    scripts: HashMap<String, ScriptedQuery>,
    jobs: HashMap<JobId, SimJob>,
    datasets: HashMap<String, Vec<DatasetRef>>,
    tables: HashMap<(String, String), Vec<(TableRef, TableSchema)>>,
    running: usize,
    peak_running: usize,
    submitted: usize,
    cancel_requests: usize,
    insert_latency: Duration,
    visibility_lag: Duration,
}

impl SimState {
    fn mark_settled(&mut self, job_id: &JobId, now: Instant) {
        if let Some(job) = self.jobs.get_mut(job_id) {
            let was_running = job.state == SimJobState::Running;
            job.settle(now);
            if was_running && job.state != SimJobState::Running {
                self.running -= 1;
            }
        }
    }
}

enum Step {
    Wait {
        until: Instant,
        stop: CancellationToken,
    },
    Ready(Result<ResultsPage, QueryError>),
}

#[derive(Debug, Default)]
pub struct SimulatedBackend {
    state: Mutex<SimState>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // A panicking test thread must not wedge every other caller
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the answer for an exact query text
    pub fn add_script(&self, query: impl Into<String>, script: ScriptedQuery) {
        self.lock().scripts.insert(query.into(), script);
    }

    pub fn add_dataset(&self, project_id: &str, dataset_id: &str, friendly_name: Option<&str>) {
        self.lock()
            .datasets
            .entry(project_id.to_string())
            .or_default()
            .push(DatasetRef {
                project_id: project_id.to_string(),
                dataset_id: dataset_id.to_string(),
                friendly_name: friendly_name.map(str::to_string),
            });
    }

    pub fn add_table(&self, table: TableRef, schema: TableSchema) {
        let mut state = self.lock();
        let datasets = state.datasets.entry(table.project_id.clone()).or_default();
        if !datasets.iter().any(|d| d.dataset_id == table.dataset_id) {
            datasets.push(DatasetRef {
                project_id: table.project_id.clone(),
                dataset_id: table.dataset_id.clone(),
                friendly_name: None,
            });
        }
        state
            .tables
            .entry((table.project_id.clone(), table.dataset_id.clone()))
            .or_default()
            .push((table, schema));
    }

    /// Number of jobs accepted so far
    pub fn submitted_jobs(&self) -> usize {
        self.lock().submitted
    }

    /// Highest number of simultaneously running jobs seen
    pub fn peak_running(&self) -> usize {
        self.lock().peak_running
    }

    pub fn cancel_requests(&self) -> usize {
        self.lock().cancel_requests
    }

    /// Delay every insert by `latency` before the job exists
    pub fn set_insert_latency(&self, latency: Duration) {
        self.lock().insert_latency = latency;
    }

    /// Keep new jobs hidden from cancel calls for `lag` after their insert
    pub fn set_visibility_lag(&self, lag: Duration) {
        self.lock().visibility_lag = lag;
    }

    pub(crate) async fn insert_job(
        &self,
        project_id: &str,
        request: &QueryRequest,
    ) -> Result<(), QueryError> {
        let job_id = request.job_id();
        let latency = self.lock().insert_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.jobs.contains_key(job_id) {
            return Err(QueryError::Backend {
                code: Some(409),
                reason: Some("duplicate".to_string()),
                message: format!(
                    "Already Exists: Job {}:{}.{}",
                    project_id, job_id.location, job_id.job
                ),
            });
        }

        let script = match state.scripts.get(request.query()) {
            Some(script) => script.clone(),
            None => answer_literal_select(request.query()).unwrap_or_else(|| {
                ScriptedQuery::failing(QueryError::Backend {
                    code: Some(400),
                    reason: Some("invalidQuery".to_string()),
                    message: format!("Unrecognized query: {}", request.query()),
                })
            }),
        };

        let now = Instant::now();
        let visible_at = now + state.visibility_lag;
        state.jobs.insert(
            job_id.clone(),
            SimJob {
                deadline: now + script.run_time,
                script,
                state: SimJobState::Running,
                visible_at,
                stop: CancellationToken::new(),
            },
        );
        state.submitted += 1;
        state.running += 1;
        state.peak_running = state.peak_running.max(state.running);
        log::debug!("Simulated job {} accepted", job_id);
        Ok(())
    }

    pub(crate) async fn query_results(
        &self,
        job_id: &JobId,
        page_token: Option<&str>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<ResultsPage, QueryError> {
        let poll_deadline = Instant::now() + timeout;
        loop {
            match self.step(job_id, page_token, page_size, poll_deadline) {
                Step::Ready(result) => return result,
                Step::Wait { until, stop } => {
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        _ = tokio::time::sleep_until(until) => {}
                    }
                }
            }
        }
    }

    fn step(
        &self,
        job_id: &JobId,
        page_token: Option<&str>,
        page_size: u32,
        poll_deadline: Instant,
    ) -> Step {
        let now = Instant::now();
        let mut state = self.lock();
        state.mark_settled(job_id, now);

        let Some(job) = state.jobs.get(job_id) else {
            return Step::Ready(Err(not_found(format!("Job {}", job_id))));
        };

        match &job.state {
            SimJobState::Running if now >= poll_deadline => Step::Ready(Ok(ResultsPage::default())),
            SimJobState::Running => Step::Wait {
                until: job.deadline.min(poll_deadline),
                stop: job.stop.clone(),
            },
            SimJobState::Cancelled => Step::Ready(Err(QueryError::Backend {
                code: Some(400),
                reason: Some("stopped".to_string()),
                message: "Job execution was cancelled: User requested cancellation".to_string(),
            })),
            SimJobState::Failed(error) => Step::Ready(Err(error.clone())),
            SimJobState::Done => Step::Ready(page_rows(&job.script, page_token, page_size)),
        }
    }

    pub(crate) async fn cancel_job(&self, job_id: &JobId) -> Result<CancelStatus, QueryError> {
        let now = Instant::now();
        let mut state = self.lock();
        state.cancel_requests += 1;
        state.mark_settled(job_id, now);

        let status = match state.jobs.get_mut(job_id) {
            None => CancelStatus::NotFound,
            Some(job) if now < job.visible_at => CancelStatus::NotFound,
            Some(job) if job.state == SimJobState::Running => {
                job.state = SimJobState::Cancelled;
                job.stop.cancel();
                CancelStatus::Requested
            }
            Some(_) => CancelStatus::AlreadyTerminal,
        };
        if status == CancelStatus::Requested {
            state.running -= 1;
        }
        Ok(status)
    }

    pub(crate) async fn list_datasets_page(
        &self,
        project_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<Page<DatasetRef>, QueryError> {
        let state = self.lock();
        let datasets = state
            .datasets
            .get(project_id)
            .ok_or_else(|| not_found(format!("Project {}", project_id)))?;
        paginate(datasets, page_size, page_token)
    }

    pub(crate) async fn list_tables_page(
        &self,
        project_id: &str,
        dataset_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<Page<TableRef>, QueryError> {
        let state = self.lock();
        let known_dataset = state
            .datasets
            .get(project_id)
            .is_some_and(|all| all.iter().any(|d| d.dataset_id == dataset_id));
        if !known_dataset {
            return Err(not_found(format!("Dataset {}:{}", project_id, dataset_id)));
        }
        let tables: Vec<TableRef> = state
            .tables
            .get(&(project_id.to_string(), dataset_id.to_string()))
            .map(|all| all.iter().map(|(t, _)| t.clone()).collect())
            .unwrap_or_default();
        paginate(&tables, page_size, page_token)
    }

    pub(crate) async fn get_table_schema(
        &self,
        table: &TableRef,
    ) -> Result<Option<TableSchema>, QueryError> {
        let state = self.lock();
        state
            .tables
            .get(&(table.project_id.clone(), table.dataset_id.clone()))
            .and_then(|all| all.iter().find(|(t, _)| t.table_id == table.table_id))
            .map(|(_, schema)| Some(schema.clone()))
            .ok_or_else(|| {
                not_found(format!(
                    "Table {}:{}.{}",
                    table.project_id, table.dataset_id, table.table_id
                ))
            })
    }
}

fn not_found(what: String) -> QueryError {
    QueryError::Backend {
        code: Some(404),
        reason: Some("notFound".to_string()),
        message: format!("Not found: {}", what),
    }
}

fn parse_offset(page_token: Option<&str>) -> Result<usize, QueryError> {
    match page_token {
        None => Ok(0),
        Some(token) => token.parse().map_err(|_| QueryError::Backend {
            code: Some(400),
            reason: Some("invalid".to_string()),
            message: format!("Invalid page token: {}", token),
        }),
    }
}

fn paginate<T: Clone>(
    items: &[T],
    page_size: u32,
    page_token: Option<&str>,
) -> Result<Page<T>, QueryError> {
    let start = parse_offset(page_token)?.min(items.len());
    let end = (start + page_size.max(1) as usize).min(items.len());
    Ok(Page {
        items: items[start..end].to_vec(),
        next_page_token: (end < items.len()).then(|| end.to_string()),
    })
}

fn page_rows(
    script: &ScriptedQuery,
    page_token: Option<&str>,
    page_size: u32,
) -> Result<ResultsPage, QueryError> {
    let page = paginate(&script.rows, page_size, page_token)?;
    Ok(ResultsPage {
        job_complete: true,
        schema: Some(script.schema.clone()),
        rows: page.items,
        page_token: page.next_page_token,
        total_rows: Some(script.rows.len() as u64),
    })
}

/// Answer `SELECT <integer> AS <name>` without a script
fn answer_literal_select(query: &str) -> Option<ScriptedQuery> {
    let tokens: Vec<&str> = query.trim().trim_end_matches(';').split_whitespace().collect();
    match tokens.as_slice() {
        [select, value, as_kw, name]
            if select.eq_ignore_ascii_case("select") && as_kw.eq_ignore_ascii_case("as") =>
        {
            let value: i64 = value.parse().ok()?;
            Some(ScriptedQuery::rows(
                TableSchema {
                    fields: vec![FieldSchema::new(*name, "INTEGER")],
                },
                vec![Row::new(vec![FieldValue::primitive(value.to_string())])],
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "simulated_tests.rs"]
mod simulated_tests;
