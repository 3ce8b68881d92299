//! Run DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{JobStatus, PipelineRun, RunResult};
use crate::domain::trigger::Event;

/// Lifecycle of a pipeline run as seen by API consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunStatus {
    /// Overall status of a finished run
    ///
    /// Cancellation and timeouts win over plain failures.
    pub fn of(run: &PipelineRun) -> Self {
        let statuses: Vec<JobStatus> = run.results.iter().map(RunResult::status).collect();
        if statuses.contains(&JobStatus::Cancelled) {
            RunStatus::Cancelled
        } else if statuses.contains(&JobStatus::TimedOut) {
            RunStatus::TimedOut
        } else if statuses.contains(&JobStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    /// Set once the run has finished
    pub exit_code: Option<i32>,
}

/// Full run details including per-job results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub event: Event,
    /// Empty while the run is still in progress
    pub jobs: Vec<RunResult>,
}
