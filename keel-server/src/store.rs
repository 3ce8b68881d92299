//! Shared server state
//!
//! Runs are kept in memory. Running runs stay until they finish; finished
//! runs are dropped oldest first once more than `max_retained_runs` of them
//! are held. Each entry keeps the cancellation token of its run so
//! `POST /runs/{id}/cancel` can stop it.

use chrono::{DateTime, Utc};
use keel_core::domain::pipeline::Pipeline;
use keel_core::domain::run::PipelineRun;
use keel_core::domain::trigger::Event;
use keel_core::dto::run::{RunDetail, RunStatus, RunSummary};
use keel_runner::{PipelineOrchestrator, TriggerMatcher};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{DEFAULT_MAX_RETAINED_RUNS, ServerConfig};

pub type RunStore = Arc<RwLock<HashMap<Uuid, RunEntry>>>;

#[derive(Clone)]
pub struct AppState {
    pub matcher: Arc<TriggerMatcher>,
    pub orchestrator: PipelineOrchestrator,
    pub runs: RunStore,
    pub max_retained_runs: usize,
}

impl AppState {
    pub fn new(config: &ServerConfig, pipelines: Vec<Arc<Pipeline>>) -> anyhow::Result<Self> {
        let orchestrator = PipelineOrchestrator::from_config(config.runner.clone())?;
        Ok(Self::with_orchestrator(orchestrator, pipelines)
            .with_max_retained_runs(config.max_retained_runs))
    }

    pub fn with_orchestrator(
        orchestrator: PipelineOrchestrator,
        pipelines: Vec<Arc<Pipeline>>,
    ) -> Self {
        Self {
            matcher: Arc::new(TriggerMatcher::new(pipelines)),
            orchestrator,
            runs: RunStore::default(),
            max_retained_runs: DEFAULT_MAX_RETAINED_RUNS,
        }
    }

    pub fn with_max_retained_runs(mut self, max_retained_runs: usize) -> Self {
        self.max_retained_runs = max_retained_runs.max(1);
        self
    }
}

/// A submitted run, finished or not
pub struct RunEntry {
    pub id: Uuid,
    pub pipeline: String,
    pub event: Event,
    pub submitted_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    /// Set once every job has reached a terminal state
    pub outcome: Option<PipelineRun>,
}

impl RunEntry {
    pub fn status(&self) -> RunStatus {
        self.outcome
            .as_ref()
            .map(RunStatus::of)
            .unwrap_or(RunStatus::Running)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            pipeline: self.pipeline.clone(),
            status: self.status(),
            submitted_at: self.submitted_at,
            exit_code: self.outcome.as_ref().map(PipelineRun::exit_code),
        }
    }

    pub fn detail(&self) -> RunDetail {
        RunDetail {
            summary: self.summary(),
            event: self.event.clone(),
            jobs: self
                .outcome
                .as_ref()
                .map(|run| run.results.clone())
                .unwrap_or_default(),
        }
    }
}
