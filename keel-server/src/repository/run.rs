//! Run Repository
//!
//! Handles all access to the in-memory run store.

use chrono::Utc;
use std::collections::HashMap;
use keel_core::domain::run::PipelineRun;
use keel_core::domain::trigger::Event;
use keel_core::dto::run::{RunDetail, RunSummary};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::{RunEntry, RunStore};

/// Registers a new running run and returns it with its cancellation token
pub async fn create(
    store: &RunStore,
    pipeline: &str,
    event: Event,
) -> (RunSummary, CancellationToken) {
    let entry = RunEntry {
        id: Uuid::new_v4(),
        pipeline: pipeline.to_string(),
        event,
        submitted_at: Utc::now(),
        cancel: CancellationToken::new(),
        outcome: None,
    };
    let created = (entry.summary(), entry.cancel.clone());

    store.write().await.insert(entry.id, entry);
    created
}

/// Stores the finished record of a run, then drops the oldest finished
/// runs beyond `retain`
///
/// Returns false when the run is unknown.
pub async fn complete(store: &RunStore, run: PipelineRun, retain: usize) -> bool {
    let mut runs = store.write().await;
    let Some(entry) = runs.get_mut(&run.id) else {
        return false;
    };
    entry.outcome = Some(run);

    let evicted = evict_finished(&mut runs, retain);
    if evicted > 0 {
        tracing::debug!("Dropped {} finished run(s) from the store", evicted);
    }
    true
}

fn evict_finished(runs: &mut HashMap<Uuid, RunEntry>, retain: usize) -> usize {
    let mut finished: Vec<_> = runs
        .values()
        .filter_map(|entry| entry.outcome.as_ref().map(|run| (run.completed_at, entry.id)))
        .collect();
    if finished.len() <= retain {
        return 0;
    }

    finished.sort();
    let excess = finished.len() - retain;
    for (_, id) in &finished[..excess] {
        runs.remove(id);
    }
    excess
}

/// Find a run by ID
pub async fn find_by_id(store: &RunStore, id: Uuid) -> Option<RunDetail> {
    store.read().await.get(&id).map(RunEntry::detail)
}

/// List all runs, most recent first
pub async fn list_all(store: &RunStore) -> Vec<RunSummary> {
    let mut runs: Vec<_> = store.read().await.values().map(RunEntry::summary).collect();
    runs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
    runs
}

/// Cancellation token of a run still in progress
///
/// `Some(None)` means the run exists but has already finished.
pub async fn find_cancel_token(store: &RunStore, id: Uuid) -> Option<Option<CancellationToken>> {
    store.read().await.get(&id).map(|entry| match entry.outcome {
        Some(_) => None,
        None => Some(entry.cancel.clone()),
    })
}
