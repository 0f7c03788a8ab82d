mod common;

use bench_core::http::retry::HttpError;
use bench_core::workspace::WorkspaceError;
use common::{Reply, TestServer};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn should_retry_get_after_transient_failure() {
    // Given a server that fails once then succeeds
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let server = TestServer::spawn(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::raw(503, "")
        } else {
            Reply::ok(json!({"id": "wh1", "name": "bench", "state": "RUNNING"}))
        }
    })
    .await;

    // When the warehouse is fetched
    let warehouse = server.client().get_warehouse("wh1").await.unwrap();

    // Then it should have retried once
    assert_eq!(warehouse.id, "wh1");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn should_fail_after_reaching_max_attempts() {
    // Given a server that always fails with a retryable status
    let server = TestServer::spawn(|_| Reply::raw(503, "")).await;

    // When
    let result = server.client().list_warehouses().await;

    // Then the retry budget of the test client (2 attempts) is exhausted
    match result {
        Err(WorkspaceError::Http {
            source: HttpError::MaxAttempts { attempts, .. },
            ..
        }) => assert_eq!(attempts, 2),
        other => panic!("expected MaxAttempts, got {other:?}"),
    }
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn should_not_retry_job_creation() {
    // Given a server failing job creation with a retryable status
    let server = TestServer::spawn(|_| {
        Reply::raw(
            503,
            json!({"error_code": "TEMPORARILY_UNAVAILABLE", "message": "try later"}).to_string(),
        )
    })
    .await;

    // When
    let result = server.client().create_job(&json!({"name": "bench"})).await;

    // Then the non-idempotent POST goes out once and the platform error comes back
    assert!(matches!(result, Err(WorkspaceError::Api { ref error_code, .. }) if error_code == "TEMPORARILY_UNAVAILABLE"));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn should_retry_idempotent_post() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let server = TestServer::spawn(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::raw(429, "")
        } else {
            Reply::ok(json!({"run_id": 5}))
        }
    })
    .await;

    let run = server.client().run_job_now(3).await.unwrap();

    assert_eq!(run.run_id, 5);
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].json()["idempotency_token"],
        requests[1].json()["idempotency_token"]
    );
}
