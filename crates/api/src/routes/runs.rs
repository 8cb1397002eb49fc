//! Run-now, status and cancellation endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use orchestrator::{RunReport, Trigger};
use tracing::info;
use uuid::Uuid;

use crate::response::{ApiError, RunList, RunSummary};
use crate::state::AppState;

/// POST /graphs/:name/runs - Start a run now.
///
/// 202 with the admitted run, 409 while another run of the graph is active.
pub async fn trigger_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<RunSummary>), ApiError> {
    let report = state.orchestrator.trigger(&name, Trigger::Manual)?;
    info!(run_id = %report.run_id, graph = %name, "Run triggered over HTTP");
    Ok((StatusCode::ACCEPTED, Json(RunSummary::from(&report))))
}

/// GET /graphs/:name/runs - Runs of a graph, newest first.
pub async fn list_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RunList>, ApiError> {
    let runs = state.orchestrator.runs(&name)?;
    Ok(Json(RunList {
        active_run_id: state.orchestrator.active_run(&name),
        runs: runs.iter().map(RunSummary::from).collect(),
        graph: name,
    }))
}

/// GET /runs/:run_id - Full run status with per-node states and attempts.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunReport>, ApiError> {
    Ok(Json(state.orchestrator.run(run_id)?))
}

/// POST /runs/:run_id/cancel - Request cancellation.
pub async fn cancel_handler(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunSummary>), ApiError> {
    let report = state.orchestrator.cancel(run_id)?;
    Ok((StatusCode::ACCEPTED, Json(RunSummary::from(&report))))
}
