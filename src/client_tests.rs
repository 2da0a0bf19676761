//! Tests for the shared client handle

use super::*;
use futures::StreamExt;
use std::sync::Arc;

fn small_pages() -> QueryConfig {
    QueryConfig {
        page_size: 2,
        poll_timeout_ms: 1_000,
        ..QueryConfig::default()
    }
}

fn numbers(n: usize) -> ScriptedQuery {
    ScriptedQuery::rows(
        TableSchema {
            fields: vec![FieldSchema::new("n", "INTEGER")],
        },
        (0..n)
            .map(|i| Row::new(vec![FieldValue::primitive(i.to_string())]))
            .collect(),
    )
}

fn handle_with(query: &str, script: ScriptedQuery) -> ClientHandle {
    let client = ClientHandle::simulated("p", &small_pages());
    client.as_simulated().unwrap().add_script(query, script);
    client
}

#[tokio::test(start_paused = true)]
async fn test_submit_pages_through_all_rows() {
    let client = handle_with("five", numbers(5).running_for(Duration::from_secs(3)));
    let request = QueryRequest::new("five", JobId::new_random("US"));

    let rows = client.submit(&request).await.unwrap();
    assert_eq!(rows.total_rows(), Some(5));
    assert_eq!(rows.schema().unwrap().fields[0].name, "n");
    assert_eq!(rows.job_id(), request.job_id());

    let collected: Vec<Row> = rows
        .into_stream()
        .map(|r| r.unwrap())
        .collect()
        .await;
    let values: Vec<String> = collected.iter().map(|r| r.to_string()).collect();
    assert_eq!(values, vec!["0,", "1,", "2,", "3,", "4,"]);
}

#[tokio::test(start_paused = true)]
async fn test_submit_zero_rows_is_success() {
    let client = handle_with("empty", numbers(0));
    let request = QueryRequest::new("empty", JobId::new_random("US"));

    let mut rows = client.submit(&request).await.unwrap();
    assert!(rows.next_row().await.is_none());
    assert!(rows.next_row().await.is_none(), "stream stays exhausted");
}

#[tokio::test(start_paused = true)]
async fn test_submit_reports_cancellation_distinctly() {
    let client = Arc::new(handle_with(
        "slow",
        numbers(1).running_for(Duration::from_secs(120)),
    ));
    let request = QueryRequest::new("slow", JobId::new_random("US"));

    let runner = {
        let client = client.clone();
        let request = request.clone();
        tokio::spawn(async move { client.submit(&request).await.map(|_| ()) })
    };

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(client.cancel(request.job_id()).await, CancelStatus::Requested);

    assert_eq!(runner.await.unwrap(), Err(QueryError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_submit_failure_is_backend_error() {
    let client = handle_with(
        "broken",
        ScriptedQuery::failing(QueryError::Backend {
            code: Some(400),
            reason: Some("invalidQuery".to_string()),
            message: "Syntax error at [1:1]".to_string(),
        }),
    );
    let request = QueryRequest::new("broken", JobId::new_random("US"));

    match client.submit(&request).await {
        Err(QueryError::Backend { message, .. }) => assert!(message.contains("Syntax error")),
        other => panic!("Expected backend error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_never_raises() {
    let client = ClientHandle::simulated("p", &small_pages());
    let status = client.cancel(&JobId::new_random("US")).await;
    assert_eq!(status, CancelStatus::NotFound);
    assert!(!status.accepted());
}

#[tokio::test(start_paused = true)]
async fn test_listing_follows_pages() {
    let client = ClientHandle::simulated("p", &small_pages());
    let sim = client.as_simulated().unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        sim.add_table(TableRef::new("p", "ds", name), TableSchema::default());
    }

    let tables = client.list_tables("ds", 2).await.unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.table_id.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d", "e"]);

    let datasets = client.list_datasets("p", 1).await.unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].dataset_id, "ds");
}

#[test]
fn test_connect_simulated_uses_default_project() {
    let client = ClientHandle::connect(
        &ClientConfig {
            backend: BackendKind::Simulated,
            ..ClientConfig::default()
        },
        &QueryConfig::default(),
    )
    .unwrap();
    assert_eq!(client.project_id(), SIMULATED_PROJECT);
    assert_eq!(client.backend().name(), "simulated");
}

#[test]
fn test_connect_rest_with_missing_key_fails() {
    let result = ClientHandle::connect(
        &ClientConfig {
            credentials: Some("/no/such/key.json".into()),
            ..ClientConfig::default()
        },
        &QueryConfig::default(),
    );
    assert!(matches!(result, Err(CredentialError::Io { .. })));
}

#[test]
fn test_cancel_status_accepted() {
    assert!(CancelStatus::Requested.accepted());
    assert!(!CancelStatus::AlreadyTerminal.accepted());
    assert!(!CancelStatus::NotFound.accepted());
    assert!(!CancelStatus::Rejected("x".to_string()).accepted());
}
