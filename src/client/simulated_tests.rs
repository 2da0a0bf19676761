//! Tests for the simulated backend

use super::*;

fn request(query: &str) -> QueryRequest {
    QueryRequest::new(query, JobId::new_random("US"))
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

#[test]
fn test_literal_select_is_answered() {
    let script = answer_literal_select("SELECT 7 as num").unwrap();
    assert_eq!(script.rows, vec![Row::new(vec![FieldValue::primitive("7")])]);
    assert_eq!(script.schema.fields[0].name, "num");
}

#[test]
fn test_literal_select_rejects_other_queries() {
    assert!(answer_literal_select("SELECT * FROM t").is_none());
    assert!(answer_literal_select("SELECT x as num").is_none());
    assert!(answer_literal_select("").is_none());
}

#[test]
fn test_paginate_splits_pages() {
    let items: Vec<u32> = (0..5).collect();
    let first = paginate(&items, 2, None).unwrap();
    assert_eq!(first.items, vec![0, 1]);
    assert_eq!(first.next_page_token.as_deref(), Some("2"));

    let last = paginate(&items, 2, Some("4")).unwrap();
    assert_eq!(last.items, vec![4]);
    assert!(last.next_page_token.is_none());
}

#[test]
fn test_paginate_rejects_garbage_token() {
    let items = vec![1, 2, 3];
    assert!(paginate(&items, 2, Some("zz")).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_job_completes_after_run_time() {
    let backend = SimulatedBackend::new();
    backend.add_script("q", numbers(3).running_for(Duration::from_secs(5)));
    let req = request("q");

    backend.insert_job("p", &req).await.unwrap();

    let early = backend
        .query_results(req.job_id(), None, 10, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(!early.job_complete, "job should still be running");

    let page = backend
        .query_results(req.job_id(), None, 10, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(page.job_complete);
    assert_eq!(page.rows.len(), 3);
    assert_eq!(page.total_rows, Some(3));
    assert_eq!(backend.peak_running(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_job_id_rejected() {
    let backend = SimulatedBackend::new();
    let req = request("SELECT 1 as num");
    backend.insert_job("p", &req).await.unwrap();

    match backend.insert_job("p", &req).await {
        Err(QueryError::Backend { code, message, .. }) => {
            assert_eq!(code, Some(409));
            assert!(message.contains("Already Exists"));
        }
        other => panic!("Expected duplicate error, got {:?}", other),
    }
    assert_eq!(backend.submitted_jobs(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_job_reports_stopped() {
    let backend = SimulatedBackend::new();
    backend.add_script("slow", numbers(1).running_for(Duration::from_secs(300)));
    let req = request("slow");
    backend.insert_job("p", &req).await.unwrap();

    assert_eq!(
        backend.cancel_job(req.job_id()).await.unwrap(),
        CancelStatus::Requested
    );

    let err = backend
        .query_results(req.job_id(), None, 10, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(err.is_cancellation());

    // Second cancel is a no-op
    assert_eq!(
        backend.cancel_job(req.job_id()).await.unwrap(),
        CancelStatus::AlreadyTerminal
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_wakes_waiting_poll() {
    let backend = std::sync::Arc::new(SimulatedBackend::new());
    backend.add_script("slow", numbers(1).running_for(Duration::from_secs(300)));
    let req = request("slow");
    backend.insert_job("p", &req).await.unwrap();

    let waiter = {
        let backend = backend.clone();
        let job_id = req.job_id().clone();
        tokio::spawn(async move {
            backend
                .query_results(&job_id, None, 10, Duration::from_secs(600))
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    backend.cancel_job(req.job_id()).await.unwrap();

    let started = Instant::now();
    let result = waiter.await.unwrap();
    assert!(result.unwrap_err().is_cancellation());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_unknown_job_is_not_found() {
    let backend = SimulatedBackend::new();
    let status = backend.cancel_job(&JobId::new_random("US")).await.unwrap();
    assert_eq!(status, CancelStatus::NotFound);
    assert_eq!(backend.cancel_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_completed_job_is_already_terminal() {
    let backend = SimulatedBackend::new();
    let req = request("SELECT 3 as num");
    backend.insert_job("p", &req).await.unwrap();

    let status = backend.cancel_job(req.job_id()).await.unwrap();
    assert_eq!(status, CancelStatus::AlreadyTerminal);

    let page = backend
        .query_results(req.job_id(), None, 10, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(page.rows.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_job_is_hidden_from_cancel_until_visible() {
    let backend = SimulatedBackend::new();
    backend.add_script("slow", numbers(1).running_for(Duration::from_secs(300)));
    backend.set_insert_latency(Duration::from_millis(800));
    backend.set_visibility_lag(Duration::from_secs(2));
    let req = request("slow");

    let started = Instant::now();
    backend.insert_job("p", &req).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(800));

    assert_eq!(backend.cancel_job(req.job_id()).await.unwrap(), CancelStatus::NotFound);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.cancel_job(req.job_id()).await.unwrap(), CancelStatus::Requested);
    assert_eq!(backend.cancel_requests(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_query_fails_as_invalid() {
    let backend = SimulatedBackend::new();
    let req = request("SELEC nonsense");
    backend.insert_job("p", &req).await.unwrap();

    let err = backend
        .query_results(req.job_id(), None, 10, Duration::from_secs(1))
        .await
        .unwrap_err();
    match err {
        QueryError::Backend { reason, .. } => assert_eq!(reason.as_deref(), Some("invalidQuery")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_metadata_listing_and_schema() {
    let backend = SimulatedBackend::new();
    backend.add_dataset("p", "empty_ds", Some("Empty"));
    backend.add_table(
        TableRef::new("p", "sales", "orders"),
        TableSchema {
            fields: vec![FieldSchema::new("id", "INTEGER")],
        },
    );

    let datasets = backend.list_datasets_page("p", 10, None).await.unwrap();
    assert_eq!(datasets.items.len(), 2);

    let tables = backend.list_tables_page("p", "sales", 10, None).await.unwrap();
    assert_eq!(tables.items, vec![TableRef::new("p", "sales", "orders")]);

    let empty = backend.list_tables_page("p", "empty_ds", 10, None).await.unwrap();
    assert!(empty.items.is_empty());

    let schema = backend
        .get_table_schema(&TableRef::new("p", "sales", "orders"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schema.fields[0].name, "id");

    assert!(backend.list_datasets_page("nope", 10, None).await.is_err());
    assert!(backend.list_tables_page("p", "missing", 10, None).await.is_err());
}
