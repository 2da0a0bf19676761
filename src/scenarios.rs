//! Demonstration runs against the shared client
//!
//! Each scenario drives the executor and the canceller the way a real
//! caller would and returns the terminal outcome of every job it started.

use std::time::Duration;

use crate::client::{FieldSchema, FieldValue, Row, ScriptedQuery, SimulatedBackend, TableRef, TableSchema};
use crate::job::JobId;
use crate::metadata;
use crate::query::{QueryOutcome, QueryService, QueryTask};

pub const LONG_QUERY: &str = "\
select c.*, b.*, a.*,
       COUNT(DISTINCT a.lv_pk) over () as distinct_lv_pk
from (
  select x1.*, x2.l_pk as x2_pk,
         LAST_VALUE(x1.l_pk) OVER (partition by x1.l_shipmode ORDER BY x1.l_shipdate desc) as lv_pk
  from tiger_tpch.out_tpch_vw__lineitem x1
  left join tiger_tpch.out_tpch_vw__lineitem x2 on (1=1)
) a
join tiger_tpch.out_tpch_tab__orders b on (b.o_orderkey = a.l_orderkey)
left join tiger_tpch.out_tpch_tab__customer c on (b.o_custkey = c.c_custkey)
limit 200";

pub const CAMPAIGNS_QUERY: &str = "\
SELECT gr__campaign_channel_id, category, `type`, budget, spend, r__campaigns__campaign_id
  FROM tiger_pce_demo.campaign_channels
 LIMIT 20;";

pub const LINE_ITEMS_QUERY: &str = "\
SELECT *
  FROM tiger_pce_demo.order_lines
 LIMIT 200;";

pub const DEMO_DATASET: &str = "tiger_demo";
pub const DEMO_TABLE: &str = "customers";

/// Waits and throttles used by the scenarios
#[derive(Debug, Clone)]
pub struct ScenarioTimings {
    /// How long `test_cancel` lets the long query run before cancelling
    pub cancel_after: Duration,
    /// Pause on each side of the foreground burst in `thread_safety_long`
    pub settle: Duration,
    /// Per-row delay of the line-items query in `thread_safety_short`
    pub row_delay: Duration,
}

impl Default for ScenarioTimings {
    fn default() -> Self {
        Self {
            cancel_after: Duration::from_secs(20),
            settle: Duration::from_secs(2),
            row_delay: Duration::from_millis(10),
        }
    }
}

/// Terminal outcomes of one scenario, in start order
#[derive(Debug, Clone, Default)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub outcomes: Vec<(JobId, QueryOutcome)>,
}

impl ScenarioReport {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, job_id: JobId, outcome: QueryOutcome) {
        self.outcomes.push((job_id, outcome));
    }

    fn extend(&mut self, other: ScenarioReport) {
        self.outcomes.extend(other.outcomes);
    }

    pub fn outcome_of(&self, job_id: &JobId) -> Option<&QueryOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == job_id)
            .map(|(_, outcome)| outcome)
    }

    pub fn log_summary(&self) {
        log::info!("Summary of {}:", self.name);
        for (job_id, outcome) in &self.outcomes {
            log::info!("  {} {}", job_id.job, outcome.label());
        }
    }
}

async fn await_task(task: QueryTask) -> (JobId, QueryOutcome) {
    let job_id = task.job_id().clone();
    log::info!("Waiting query to finish");
    let outcome = task.wait().await;
    (job_id, outcome)
}

/// Run one query on the current task
pub async fn query(service: &QueryService, text: &str) -> ScenarioReport {
    let mut report = ScenarioReport::new("query");
    let job_id = service.new_job_id();
    let outcome = service.executor().run(text, job_id.clone(), None).await;
    report.record(job_id, outcome);
    report
}

/// Start the long query, cancel it after a while, wait for it
pub async fn test_cancel(service: &QueryService, timings: &ScenarioTimings) -> ScenarioReport {
    log::info!("test cancel - start");
    let mut report = ScenarioReport::new("test cancel");

    let job_id = service.new_job_id();
    log::info!("Starting async...");
    let task = service.executor().spawn(LONG_QUERY, job_id.clone(), None);

    log::info!("Waiting {:?}", timings.cancel_after);
    tokio::time::sleep(timings.cancel_after).await;
    log::info!("Cancelling query");
    service.canceller().request_cancel(&job_id).await;

    let (job_id, outcome) = await_task(task).await;
    report.record(job_id, outcome);
    log::info!("test cancel - finished");
    report
}

/// Long query in the background, a run of short ones in the foreground
pub async fn thread_safety_long(
    service: &QueryService,
    timings: &ScenarioTimings,
) -> ScenarioReport {
    log::info!("test ThreadSafetyLong - start");
    let mut report = ScenarioReport::new("thread safety long");

    let long_id = service.new_job_id();
    log::info!("Starting async with long query...");
    let long_task = service.executor().spawn(LONG_QUERY, long_id.clone(), None);

    tokio::time::sleep(timings.settle).await;
    log::info!("Executing other queries by the same client");
    for n in 0..5 {
        let job_id = service.new_job_id();
        let outcome = service
            .executor()
            .run(&format!("SELECT {} as num", n), job_id.clone(), None)
            .await;
        report.record(job_id, outcome);
    }

    tokio::time::sleep(timings.settle).await;
    log::info!("Cancelling long query");
    service.canceller().request_cancel(&long_id).await;

    let (job_id, outcome) = await_task(long_task).await;
    report.record(job_id, outcome);
    log::info!("test ThreadSafetyLong - finished");
    report
}

/// Throttled many-row query alongside a burst of short ones
pub async fn thread_safety_short(
    service: &QueryService,
    timings: &ScenarioTimings,
) -> ScenarioReport {
    log::info!("test ThreadSafetyShort - start");
    let mut report = ScenarioReport::new("thread safety short");

    log::info!("Starting async with short query and lots of results...");
    let lines_task = service.executor().spawn(
        LINE_ITEMS_QUERY,
        service.new_job_id(),
        Some(timings.row_delay),
    );

    log::info!("Starting async with burst of selects...");
    let burst = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut burst = ScenarioReport::new("burst");
            for n in 0..10 {
                let job_id = service.new_job_id();
                let outcome = service
                    .executor()
                    .run(&format!("SELECT {} as num", n), job_id.clone(), None)
                    .await;
                burst.record(job_id, outcome);
            }
            burst
        })
    };

    log::info!("Waiting ...");
    let (job_id, outcome) = await_task(lines_task).await;
    report.record(job_id, outcome);
    match burst.await {
        Ok(burst) => report.extend(burst),
        Err(e) => log::error!("Query await failed - {}", e),
    }
    log::info!("test ThreadSafetyShort - finished");
    report
}

/// The default sequence: campaigns query, table listing, columns, cancel test
pub async fn demo(
    service: &QueryService,
    listing_page_size: u32,
    timings: &ScenarioTimings,
) -> ScenarioReport {
    let mut report = query(service, CAMPAIGNS_QUERY).await;
    report.name = "demo";

    let client = service.client();
    metadata::list_tables(client, DEMO_DATASET, listing_page_size).await;
    metadata::list_table_columns(client, DEMO_DATASET, DEMO_TABLE).await;

    report.extend(test_cancel(service, timings).await);
    report
}

/// Load the demo catalog and query scripts into a simulated backend
pub fn seed_demo(sim: &SimulatedBackend, project_id: &str) {
    sim.add_table(
        TableRef::new(project_id, DEMO_DATASET, DEMO_TABLE),
        schema(&[
            ("customer_id", "STRING"),
            ("customer_name", "STRING"),
            ("state", "STRING"),
            ("region", "STRING"),
        ]),
    );
    sim.add_table(
        TableRef::new(project_id, DEMO_DATASET, "products"),
        schema(&[("product_id", "STRING"), ("product_name", "STRING"), ("category", "STRING")]),
    );
    sim.add_dataset(project_id, "tiger_pce_demo", Some("PCE demo"));

    let campaigns_schema = schema(&[
        ("gr__campaign_channel_id", "STRING"),
        ("category", "STRING"),
        ("type", "STRING"),
        ("budget", "NUMERIC"),
        ("spend", "NUMERIC"),
        ("r__campaigns__campaign_id", "STRING"),
    ]);
    let categories = ["social", "search", "display", "email"];
    let campaigns = (0..20)
        .map(|i| {
            cells(&[
                format!("cc_{:03}", i),
                categories[i % categories.len()].to_string(),
                if i % 2 == 0 { "paid" } else { "organic" }.to_string(),
                format!("{}.00", 1000 + i * 250),
                format!("{}.50", 400 + i * 90),
                format!("c_{:02}", i / 3),
            ])
        })
        .collect();
    sim.add_table(
        TableRef::new(project_id, "tiger_pce_demo", "campaign_channels"),
        campaigns_schema.clone(),
    );
    sim.add_script(
        CAMPAIGNS_QUERY,
        ScriptedQuery::rows(campaigns_schema, campaigns).running_for(Duration::from_millis(800)),
    );

    let lines_schema = schema(&[
        ("order_line_id", "STRING"),
        ("order_id", "STRING"),
        ("product_id", "STRING"),
        ("quantity", "INTEGER"),
        ("price", "NUMERIC"),
    ]);
    let lines = (0..200)
        .map(|i| {
            cells(&[
                format!("ol_{:04}", i),
                format!("o_{:04}", i / 4),
                format!("p_{:03}", i % 37),
                (1 + i % 5).to_string(),
                format!("{}.99", 5 + i % 60),
            ])
        })
        .collect();
    sim.add_table(
        TableRef::new(project_id, "tiger_pce_demo", "order_lines"),
        lines_schema.clone(),
    );
    sim.add_script(
        LINE_ITEMS_QUERY,
        ScriptedQuery::rows(lines_schema, lines).running_for(Duration::from_millis(500)),
    );

    let long_rows = (0..200)
        .map(|i| cells(&[format!("{}", i), format!("{}", i * 7)]))
        .collect();
    sim.add_script(
        LONG_QUERY,
        ScriptedQuery::rows(schema(&[("l_orderkey", "INTEGER"), ("distinct_lv_pk", "INTEGER")]), long_rows)
            .running_for(Duration::from_secs(15 * 60)),
    );
}

fn schema(fields: &[(&str, &str)]) -> TableSchema {
    TableSchema {
        fields: fields
            .iter()
            .map(|(name, field_type)| FieldSchema::new(*name, *field_type))
            .collect(),
    }
}

fn cells(values: &[String]) -> Row {
    Row::new(values.iter().cloned().map(FieldValue::primitive).collect())
}

#[cfg(test)]
#[path = "scenarios_tests.rs"]
mod scenarios_tests;
