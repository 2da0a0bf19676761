//! Concurrent submit and cancel behaviour over one shared client

use std::sync::Arc;
use std::time::Duration;

use bqprobe::client::{ClientHandle, FieldSchema, FieldValue, Row, ScriptedQuery, TableSchema};
use bqprobe::config::QueryConfig;
use bqprobe::query::{CollectSink, QueryOutcome, QueryService};
use bqprobe::{JobId, QueryError};
use proptest::prelude::*;

const LONG: &str = "SELECT * FROM warehouse.huge";
const TWENTY: &str = "SELECT * FROM shop.campaigns LIMIT 20";
const EMPTY: &str = "SELECT * FROM shop.campaigns LIMIT 0";

fn tagged_rows(tag: &str, n: usize) -> ScriptedQuery {
    ScriptedQuery::rows(
        TableSchema {
            fields: vec![FieldSchema::new("tag", "STRING"), FieldSchema::new("i", "INTEGER")],
        },
        (0..n)
            .map(|i| {
                Row::new(vec![
                    FieldValue::primitive(tag),
                    FieldValue::primitive(i.to_string()),
                ])
            })
            .collect(),
    )
}

fn service() -> QueryService {
    let config = QueryConfig {
        page_size: 8,
        ..QueryConfig::default()
    };
    let client = Arc::new(ClientHandle::simulated("p", &config));
    let sim = client.as_simulated().unwrap();
    sim.add_script(LONG, tagged_rows("long", 3).running_for(Duration::from_secs(3600)));
    sim.add_script(TWENTY, tagged_rows("twenty", 20).running_for(Duration::from_secs(1)));
    sim.add_script(EMPTY, tagged_rows("empty", 0));
    QueryService::new(client, &config, "US")
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

#[tokio::test(start_paused = true)]
async fn test_fresh_query_completes_with_backend_row_count() {
    let service = service();
    let mut sink = CollectSink::default();

    let outcome = service
        .executor()
        .run_into(TWENTY, service.new_job_id(), None, &mut sink)
        .await;

    assert_eq!(outcome, QueryOutcome::Completed { rows: 20 });
    assert_eq!(sink.rows.len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_zero_row_result_is_completed() {
    let service = service();
    let outcome = service.executor().run(EMPTY, service.new_job_id(), None).await;
    assert_eq!(outcome, QueryOutcome::Completed { rows: 0 });
}

#[tokio::test(start_paused = true)]
async fn test_long_query_cancelled_after_delay() {
    let service = service();
    let job = service.new_job_id();
    let task = service.executor().spawn(LONG, job.clone(), None);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(service.canceller().request_cancel(&job).await);

    let outcome = tokio::time::timeout(Duration::from_secs(5), task.wait())
        .await
        .expect("cancelled query should finish promptly");
    assert_eq!(outcome, QueryOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_recancel_is_noop() {
    let service = service();
    let job = service.new_job_id();
    let task = service.executor().spawn(LONG, job.clone(), None);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(service.canceller().request_cancel(&job).await);
    assert_eq!(task.wait().await, QueryOutcome::Cancelled);

    assert!(!service.canceller().request_cancel(&job).await);
    assert!(!service.canceller().request_cancel(&job).await);
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_one_query_leaves_the_other_alone() {
    let service = service();
    let first = service.new_job_id();
    let second = service.new_job_id();

    let long_task = service.executor().spawn(LONG, first.clone(), None);
    let short_task =
        service
            .executor()
            .spawn_into(TWENTY, second, Some(Duration::from_millis(100)), CollectSink::default());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    service.canceller().request_cancel(&first).await;

    assert_eq!(long_task.wait().await, QueryOutcome::Cancelled);
    let (outcome, sink) = short_task.finish().await;
    assert_eq!(outcome, QueryOutcome::Completed { rows: 20 });
    assert_eq!(sink.unwrap().rows.len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_burst_alongside_long_query_has_no_cross_contamination() {
    let service = service();
    let long_job = service.new_job_id();
    let long_task = service.executor().spawn(LONG, long_job.clone(), None);

    let burst: Vec<_> = (0..10)
        .map(|n| {
            service.executor().spawn_into(
                format!("SELECT {} as num", n),
                service.new_job_id(),
                None,
                CollectSink::default(),
            )
        })
        .collect();
    let twenty = service.executor().spawn_into(
        TWENTY,
        service.new_job_id(),
        Some(Duration::from_millis(10)),
        CollectSink::default(),
    );

    for (n, task) in burst.into_iter().enumerate() {
        let (outcome, sink) = task.finish().await;
        assert_eq!(outcome, QueryOutcome::Completed { rows: 1 });
        let rows = sink.unwrap().rows;
        assert_eq!(rows, vec![Row::new(vec![FieldValue::primitive(n.to_string())])]);
    }

    let (outcome, sink) = twenty.finish().await;
    assert_eq!(outcome, QueryOutcome::Completed { rows: 20 });
    let rows = sink.unwrap().rows;
    assert!(rows.iter().all(|r| r.values()[0] == FieldValue::primitive("twenty")));
    let order: Vec<String> = rows.iter().map(|r| r.values()[1].to_string()).collect();
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(order, expected);

    service.canceller().request_cancel(&long_job).await;
    assert_eq!(long_task.wait().await, QueryOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_unknown_job_does_not_raise() {
    let service = service();
    assert!(!service.canceller().request_cancel(&JobId::new_random("US")).await);
}

#[tokio::test(start_paused = true)]
async fn test_same_token_other_location_is_a_different_job() {
    let service = service();
    let us = JobId::of("shared_token", "US");
    let eu = JobId::of("shared_token", "EU");

    let task = service.executor().spawn(LONG, us.clone(), None);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!service.canceller().request_cancel(&eu).await);
    assert!(!task.is_finished());

    service.canceller().request_cancel(&us).await;
    assert_eq!(task.wait().await, QueryOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_failed_query_is_reported_not_raised() {
    let service = service();
    let outcome = service
        .executor()
        .run("SELECT definitely not sql", service.new_job_id(), None)
        .await;
    assert!(matches!(outcome, QueryOutcome::Failed(QueryError::Backend { .. })));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Cancel may arrive before submission, during the run or after completion
    #[test]
    fn prop_cancel_at_any_time_never_corrupts_outcome(cancel_after_ms in 0u64..3_000) {
        let (outcome, accepted) = block_on(async move {
            let service = service();
            let job = service.new_job_id();
            let task = service.executor().spawn(TWENTY, job.clone(), None);

            tokio::time::sleep(Duration::from_millis(cancel_after_ms)).await;
            let accepted = service.canceller().request_cancel(&job).await;
            (task.wait().await, accepted)
        });

        match outcome {
            QueryOutcome::Completed { rows } => {
                prop_assert_eq!(rows, 20);
                prop_assert!(!accepted, "accepted cancel must not end in completion");
            }
            QueryOutcome::Cancelled => prop_assert!(accepted),
            QueryOutcome::Failed(e) => prop_assert!(false, "unexpected failure {}", e),
        }
    }
}
