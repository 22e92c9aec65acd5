//! Tests for the API client and task tracking, against a mock HTTP server.

#[allow(dead_code)]
mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use taskwright::api::tasks::{TaskState, TaskTracker, TrackerError};
use taskwright::api::{ApiClient, ApiError, Operation, TaskRef};
use taskwright::config::Target;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ApiClient {
    common::init_tracing();
    let target: Arc<Target> = Target::builder("mock")
        .local()
        .api_url(Url::parse(&server.uri()).unwrap())
        .api_auth("admin", "password")
        .build();
    ApiClient::new(target).unwrap()
}

fn fast_tracker(api: &ApiClient) -> TaskTracker<'_> {
    TaskTracker::new(api).with_poll_interval(Duration::from_millis(5), Duration::from_millis(20))
}

#[tokio::test]
async fn synchronous_response_is_a_completed_operation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/status/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"online": true})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = api.get("api/v3/status/").await.unwrap();

    assert_eq!(operation, Operation::Completed(json!({"online": true})));
}

#[tokio::test]
async fn rejection_decodes_the_error_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/missing/"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not found."})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let err = api.get("api/v3/missing/").await.unwrap_err();

    match err {
        ApiError::Rejected { status, detail, path } => {
            assert_eq!(status, 404);
            assert_eq!(detail, "Not found.");
            assert_eq!(path, "api/v3/missing/");
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn rejection_without_envelope_falls_back_to_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/oops/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("proxy exploded"))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let err = api.get("api/v3/oops/").await.unwrap_err();

    match err {
        ApiError::Rejected { status, detail, .. } => {
            assert_eq!(status, 500);
            assert_eq!(detail, "proxy exploded");
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn accepted_response_with_task_ref_is_deferred() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/sync/"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"task": "/t/root/"})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = api.post("api/v3/sync/", json!({})).await.unwrap();

    assert_eq!(
        operation,
        Operation::Deferred(vec![TaskRef("/t/root/".to_string())])
    );
}

#[tokio::test]
async fn accepted_response_without_task_refs_stays_completed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/enqueue/"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"queued": true})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = api.post("api/v3/enqueue/", json!({})).await.unwrap();

    assert_eq!(operation, Operation::Completed(json!({"queued": true})));
}

#[tokio::test]
async fn single_immediately_succeeding_task_resolves_with_one_node() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t/root/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "succeeded"})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = Operation::Deferred(vec![TaskRef("/t/root/".to_string())]);
    let graph = fast_tracker(&api)
        .await_completion(&operation, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(graph.len(), 1);
    assert_eq!(graph.tasks["/t/root/"].state, TaskState::Succeeded);
}

#[tokio::test]
async fn completed_operation_resolves_without_polling() {
    let server = MockServer::start().await;
    let api = client_for(&server);

    let operation = Operation::Completed(json!({"ok": true}));
    let graph = fast_tracker(&api)
        .await_completion(&operation, Duration::from_secs(1))
        .await
        .unwrap();

    assert!(graph.is_empty());
}

#[tokio::test]
async fn spawned_children_are_discovered_after_the_parent_succeeds() {
    let server = MockServer::start().await;
    // Root reports running once, then succeeds and reveals two children.
    Mock::given(method("GET"))
        .and(path("/t/root/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "running"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t/root/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "succeeded",
            "spawned_tasks": ["/t/a/", "/t/b/"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t/a/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "succeeded"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t/b/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "succeeded"})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = Operation::Deferred(vec![TaskRef("/t/root/".to_string())]);
    let graph = fast_tracker(&api)
        .await_completion(&operation, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(graph.len(), 3);
    let ids: Vec<&str> = graph.tasks.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["/t/root/", "/t/a/", "/t/b/"]);
}

#[tokio::test]
async fn one_failed_child_fails_the_graph_and_names_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t/root/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "succeeded",
            "spawned_tasks": ["/t/a/", "/t/b/"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t/a/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "succeeded"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t/b/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "failed",
            "error": {"description": "disk full"}
        })))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = Operation::Deferred(vec![TaskRef("/t/root/".to_string())]);
    let err = fast_tracker(&api)
        .await_completion(&operation, Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        TrackerError::TaskFailed {
            task, observed, ..
        } => {
            assert_eq!(task.id, "/t/b/");
            assert_eq!(task.state, TaskState::Failed);
            assert!(task.error.is_some());
            // The sibling that succeeded is reported as observed-terminal.
            assert!(observed.contains(&"/t/a/".to_string()));
            assert!(observed.contains(&"/t/root/".to_string()));
        }
        other => panic!("expected TaskFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn failure_report_lists_siblings_never_observed_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t/root/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "succeeded",
            "spawned_tasks": ["/t/a/", "/t/b/"]
        })))
        .mount(&server)
        .await;
    // One sibling never progresses past running.
    Mock::given(method("GET"))
        .and(path("/t/a/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "running"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t/b/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "failed"})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = Operation::Deferred(vec![TaskRef("/t/root/".to_string())]);
    let err = fast_tracker(&api)
        .await_completion(&operation, Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        TrackerError::TaskFailed {
            task,
            observed,
            unobserved,
        } => {
            assert_eq!(task.id, "/t/b/");
            assert_eq!(observed, vec!["/t/root/".to_string(), "/t/b/".to_string()]);
            assert_eq!(unobserved, vec!["/t/a/".to_string()]);
        }
        other => panic!("expected TaskFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn canceled_task_is_distinguished_from_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t/root/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "canceled"})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = Operation::Deferred(vec![TaskRef("/t/root/".to_string())]);
    let err = fast_tracker(&api)
        .await_completion(&operation, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, TrackerError::TaskCanceled { .. }));
}

#[tokio::test]
async fn task_stuck_running_past_the_deadline_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t/slow/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "running"})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = Operation::Deferred(vec![TaskRef("/t/slow/".to_string())]);
    let err = fast_tracker(&api)
        .await_completion(&operation, Duration::from_millis(100))
        .await
        .unwrap_err();

    match err {
        TrackerError::TaskTimeout { pending, .. } => {
            assert_eq!(pending, vec!["/t/slow/".to_string()]);
        }
        other => panic!("expected TaskTimeout, got {:?}", other),
    }
}

#[tokio::test]
async fn polling_a_rejected_status_endpoint_propagates_the_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/t/gone/"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "unknown task"})))
        .mount(&server)
        .await;

    let api = client_for(&server);
    let operation = Operation::Deferred(vec![TaskRef("/t/gone/".to_string())]);
    let err = fast_tracker(&api)
        .await_completion(&operation, Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, TrackerError::Api(ApiError::Rejected { status: 404, .. })));
}
