//! HTTP surface of the orchestrator: run-now, status and cancellation.

use api::response::{ErrorResponse, HealthResponse, RunList, RunSummary};
use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::setup::OrchestratorHarness;
use orchestrator::{RunReport, RunState, TaskState};
use uuid::Uuid;
use worker::{JobStatus, LOAD_CUSTOMERS, MONITOR_STREAMING_JOB, PIPELINE_GRAPH};

fn runs_path() -> String {
    format!("/graphs/{}/runs", PIPELINE_GRAPH)
}

#[tokio::test]
async fn test_trigger_returns_accepted() {
    let harness = OrchestratorHarness::new();
    let server = TestServer::new(harness.router()).expect("Failed to create test server");

    let response = server.post(&runs_path()).await;
    response.assert_status(StatusCode::ACCEPTED);

    let summary: RunSummary = response.json();
    assert_eq!(summary.graph, PIPELINE_GRAPH);
    assert!(matches!(
        summary.state,
        RunState::Pending | RunState::Running
    ));
    assert_eq!(
        harness.orchestrator.active_run(PIPELINE_GRAPH),
        Some(summary.run_id)
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_trigger_is_conflict() {
    let harness = OrchestratorHarness::new();
    let server = TestServer::new(harness.router()).expect("Failed to create test server");

    let first: RunSummary = server.post(&runs_path()).await.json();

    let response = server.post(&runs_path()).await;
    response.assert_status(StatusCode::CONFLICT);
    let body: ErrorResponse = response.json();
    assert_eq!(body.code, "RUN_002");
    assert_eq!(body.active_run_id, Some(first.run_id));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_graph_and_run_are_not_found() {
    let harness = OrchestratorHarness::new();
    let server = TestServer::new(harness.router()).expect("Failed to create test server");

    let response = server.post("/graphs/nope/runs").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: ErrorResponse = response.json();
    assert_eq!(body.code, "RUN_001");

    let response = server.get(&format!("/runs/{}", Uuid::new_v4())).await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: ErrorResponse = response.json();
    assert_eq!(body.code, "RUN_003");

    let response = server.get("/graphs/nope/runs").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_run_status_lists_nodes() {
    let harness = OrchestratorHarness::new();
    harness
        .loader
        .fail_next_loads(engine_core::ReferenceTable::Customers, 3);
    let server = TestServer::new(harness.router()).expect("Failed to create test server");

    let summary: RunSummary = server.post(&runs_path()).await.json();
    harness.orchestrator.wait(summary.run_id).await.unwrap();

    let response = server.get(&format!("/runs/{}", summary.run_id)).await;
    response.assert_status_ok();
    let report: RunReport = response.json();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.nodes.len(), 4);
    let customers = report.node(LOAD_CUSTOMERS).unwrap();
    assert_eq!(customers.state, TaskState::Failed);
    assert_eq!(customers.attempts, 3);
    assert_eq!(
        report.node(MONITOR_STREAMING_JOB).unwrap().state,
        TaskState::Skipped
    );

    let list: RunList = server.get(&runs_path()).await.json();
    assert_eq!(list.runs.len(), 1);
    assert_eq!(list.active_run_id, None);
    assert_eq!(list.runs[0].failed_nodes, vec![LOAD_CUSTOMERS.to_string()]);
}

#[tokio::test]
async fn test_cancel_then_cancel_again() {
    let harness = OrchestratorHarness::new();
    let server = TestServer::new(harness.router()).expect("Failed to create test server");

    let summary: RunSummary = server.post(&runs_path()).await.json();

    let response = server
        .post(&format!("/runs/{}/cancel", summary.run_id))
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let report = harness.orchestrator.wait(summary.run_id).await.unwrap();
    assert_eq!(report.state, RunState::Cancelled);

    let response = server
        .post(&format!("/runs/{}/cancel", summary.run_id))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: ErrorResponse = response.json();
    assert_eq!(body.code, "RUN_004");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_health_endpoints() {
    let harness = OrchestratorHarness::new();
    let server = TestServer::new(harness.router()).expect("Failed to create test server");

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: HealthResponse = response.json();
    assert!(
        body.status == "healthy" || body.status == "degraded" || body.status == "unhealthy",
        "unexpected status {}",
        body.status
    );
    assert_eq!(body.job, Some(JobStatus::NotSubmitted));

    let response = server.get("/health/ready").await;
    let status = response.status_code();
    assert!(
        status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE,
        "Ready endpoint should return 200 or 503, got {}",
        status
    );

    server.get("/health/live").await.assert_status_ok();
}
