//! Event API Handlers

use axum::{Json, extract::State, http::StatusCode};
use keel_core::domain::trigger::Event;
use keel_core::dto::event::EventAccepted;

use crate::api::error::ApiResult;
use crate::service::run_service;
use crate::store::AppState;

/// POST /events
/// Start a run for every pipeline the event triggers
///
/// Always `202 Accepted` for a well-formed event; an empty `runs` list means
/// nothing was triggered.
pub async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    tracing::info!(
        "Received {} event for {} on {}",
        event.kind,
        event.repository,
        event.git_ref
    );

    let accepted = run_service::submit_event(&state, event).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
