//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orchestrator::{RunReport, RunState, Trigger};
use serde::{Deserialize, Serialize};
use telemetry::ComponentHealthReport;
use uuid::Uuid;
use worker::JobStatus;

/// Short form of a run, returned by trigger, list and cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub graph: String,
    pub state: RunState,
    pub trigger: Trigger,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed_nodes: Vec<String>,
}

impl From<&RunReport> for RunSummary {
    fn from(report: &RunReport) -> Self {
        Self {
            run_id: report.run_id,
            graph: report.graph.clone(),
            state: report.state,
            trigger: report.trigger.clone(),
            created_at: report.created_at.timestamp_millis(),
            finished_at: report.finished_at.map(|t| t.timestamp_millis()),
            failed_nodes: report
                .failed_nodes
                .iter()
                .map(|n| n.task_id.clone())
                .collect(),
        }
    }
}

/// Runs of one graph, newest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunList {
    pub graph: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_run_id: Option<Uuid>,
    pub runs: Vec<RunSummary>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: Vec<ComponentHealthReport>,
    pub active_runs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobStatus>,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_run_id: Option<Uuid>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            active_run_id: None,
        }
    }
}

/// API error type with stable error codes.
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INT_001", msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<orchestrator::Error> for ApiError {
    fn from(err: orchestrator::Error) -> Self {
        use orchestrator::Error;

        let status = match &err {
            Error::UnknownGraph { .. } | Error::UnknownRun { .. } => StatusCode::NOT_FOUND,
            Error::DuplicateRun { .. } | Error::RunFinished { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut api = ApiError::with_code(status, err.error_code(), err.to_string());
        if let Error::DuplicateRun { active_run_id, .. } = err {
            api.response.active_run_id = Some(active_run_id);
        }
        api
    }
}
