//! Run Service
//!
//! Business logic for event submission and run lifecycle.

use keel_core::domain::trigger::Event;
use keel_core::dto::event::EventAccepted;
use keel_core::dto::run::{RunDetail, RunSummary};
use keel_core::error::EventError;
use uuid::Uuid;

use crate::repository::run_repository;
use crate::store::AppState;

/// Service error type
#[derive(Debug)]
pub enum RunError {
    NotFound(Uuid),
    InvalidEvent(EventError),
    AlreadyFinished(Uuid),
}

/// Starts one run per pipeline whose triggers accept `event`
///
/// Runs execute in the background; the returned summaries are all
/// `running`. No matching pipeline is not an error.
pub async fn submit_event(state: &AppState, event: Event) -> Result<EventAccepted, RunError> {
    let pipelines = state
        .matcher
        .matching(&event)
        .map_err(RunError::InvalidEvent)?;

    let mut runs = Vec::with_capacity(pipelines.len());
    for pipeline in pipelines {
        let (summary, cancel) =
            run_repository::create(&state.runs, &pipeline.name, event.clone()).await;

        let orchestrator = state.orchestrator.clone();
        let store = state.runs.clone();
        let retain = state.max_retained_runs;
        let event = event.clone();
        let id = summary.id;
        tokio::spawn(async move {
            let run = orchestrator.run(id, pipeline, event, cancel).await;
            if !run_repository::complete(&store, run, retain).await {
                tracing::warn!("Run {} finished but is no longer tracked", id);
            }
        });

        tracing::info!("Run {} started for pipeline '{}'", summary.id, summary.pipeline);
        runs.push(summary);
    }

    if runs.is_empty() {
        tracing::info!(
            "Event {} {} on {} triggered no pipeline",
            event.kind,
            event.git_ref,
            event.repository
        );
    }

    Ok(EventAccepted { runs })
}

/// Get a run by ID
pub async fn get_run(state: &AppState, id: Uuid) -> Result<RunDetail, RunError> {
    run_repository::find_by_id(&state.runs, id)
        .await
        .ok_or(RunError::NotFound(id))
}

/// List all runs
pub async fn list_runs(state: &AppState) -> Vec<RunSummary> {
    run_repository::list_all(&state.runs).await
}

/// Signals a running run to stop
///
/// The run finishes asynchronously as cancelled; its steps are interrupted
/// and no further step starts.
pub async fn cancel_run(state: &AppState, id: Uuid) -> Result<(), RunError> {
    let cancel = run_repository::find_cancel_token(&state.runs, id)
        .await
        .ok_or(RunError::NotFound(id))?
        .ok_or(RunError::AlreadyFinished(id))?;

    cancel.cancel();
    tracing::info!("Run {} cancellation requested", id);
    Ok(())
}
