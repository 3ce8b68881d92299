//! Run API Handlers
//!
//! HTTP endpoints for run status and cancellation.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use keel_core::dto::run::{RunDetail, RunSummary};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::run_service;
use crate::store::AppState;

/// GET /runs
/// List runs, most recent first
///
/// Query parameters:
/// - `pipeline` (optional): only runs of this pipeline
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<ListRunsQuery>,
) -> Json<Vec<RunSummary>> {
    tracing::debug!("Listing runs");

    let mut runs = run_service::list_runs(&state).await;
    if let Some(pipeline) = &params.pipeline {
        runs.retain(|run| &run.pipeline == pipeline);
    }
    Json(runs)
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub pipeline: Option<String>,
}

/// GET /runs/{id}
/// Get run details, including job results once finished
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunDetail>> {
    tracing::debug!("Getting run: {}", id);
    Ok(Json(run_service::get_run(&state, id).await?))
}

/// POST /runs/{id}/cancel
/// Request cancellation of a running run
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling run: {}", id);
    run_service::cancel_run(&state, id).await?;
    Ok(StatusCode::ACCEPTED)
}
