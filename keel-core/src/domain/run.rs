//! Run domain types
//!
//! A [`RunResult`] is the terminal record of one job execution. It can only be
//! produced by a [`RunRecorder`], which walks the per-job state machine
//!
//! ```text
//! Idle -> Matching -> Authorizing -> Executing -> Succeeded
//!                          |              |
//!                          +--------------+--> Failed | Cancelled | TimedOut
//! ```
//!
//! and rejects any other transition. Once finished, a result exposes only
//! read accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::log::LogEntry;
use crate::domain::trigger::Event;

/// Exit code reported when a job exceeds its ceiling
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit code reported when a step's command or action cannot be found or spawned
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when a run is cancelled
pub const EXIT_CANCELLED: i32 = 130;

/// Per-job execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Matching,
    Authorizing,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled | RunState::TimedOut
        )
    }

    pub fn can_transition(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Matching)
                | (Matching, Authorizing)
                | (Authorizing, Executing)
                | (Authorizing, Failed)
                | (Authorizing, Cancelled)
                | (Authorizing, TimedOut)
                | (Executing, Succeeded)
                | (Executing, Failed)
                | (Executing, Cancelled)
                | (Executing, TimedOut)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Matching => "matching",
            RunState::Authorizing => "authorizing",
            RunState::Executing => "executing",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
            RunState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid run transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}

/// Terminal status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobStatus {
    fn from_state(state: RunState) -> Option<Self> {
        match state {
            RunState::Succeeded => Some(JobStatus::Succeeded),
            RunState::Failed => Some(JobStatus::Failed),
            RunState::Cancelled => Some(JobStatus::Cancelled),
            RunState::TimedOut => Some(JobStatus::TimedOut),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Why a job did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A required secret was denied or unavailable; no step ran
    AuthorizationDenied,
    /// A step exited nonzero; later steps did not run
    StepFailed,
    Cancelled,
    TimedOut,
    /// The job environment could not be prepared
    Setup,
}

impl FailureKind {
    fn terminal_state(&self) -> RunState {
        match self {
            FailureKind::AuthorizationDenied | FailureKind::StepFailed | FailureKind::Setup => {
                RunState::Failed
            }
            FailureKind::Cancelled => RunState::Cancelled,
            FailureKind::TimedOut => RunState::TimedOut,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// Step that terminated the job, if any
    pub step: Option<String>,
    pub exit_code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Record of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
    /// `None` when the step was interrupted before it exited
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Range of this step's entries in [`RunResult::logs`]
    pub log_range: Range<usize>,
}

/// Immutable terminal record of one job execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    run_id: Uuid,
    pipeline: String,
    job: String,
    status: JobStatus,
    failure: Option<Failure>,
    steps: Vec<StepRecord>,
    logs: Vec<LogEntry>,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl RunResult {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Single exit code for consumers of the result
    pub fn exit_code(&self) -> i32 {
        self.failure.as_ref().map(|f| f.exit_code).unwrap_or(0)
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Names of the steps that ran, in execution order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Log entries captured for the step at `index`
    pub fn step_logs(&self, index: usize) -> &[LogEntry] {
        self.steps
            .get(index)
            .and_then(|step| self.logs.get(step.log_range.clone()))
            .unwrap_or(&[])
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

/// Builds a [`RunResult`] while enforcing the run state machine
#[derive(Debug)]
pub struct RunRecorder {
    run_id: Uuid,
    pipeline: String,
    job: String,
    state: RunState,
    failure: Option<Failure>,
    steps: Vec<StepRecord>,
    logs: Vec<LogEntry>,
    started_at: DateTime<Utc>,
}

impl RunRecorder {
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            job: job.into(),
            state: RunState::Idle,
            failure: None,
            steps: Vec::new(),
            logs: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn transition(&mut self, next: RunState) -> Result<(), TransitionError> {
        if !self.state.can_transition(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Appends job-level log entries
    pub fn push_logs(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        self.logs.extend(entries);
    }

    /// Records a finished step along with the log entries it produced
    pub fn record_step(
        &mut self,
        name: impl Into<String>,
        outcome: StepOutcome,
        exit_code: Option<i32>,
        started_at: DateTime<Utc>,
        logs: Vec<LogEntry>,
    ) {
        let start = self.logs.len();
        self.logs.extend(logs);
        self.steps.push(StepRecord {
            name: name.into(),
            outcome,
            exit_code,
            started_at,
            finished_at: Utc::now(),
            log_range: start..self.logs.len(),
        });
    }

    /// Moves the run to the terminal state matching `failure.kind`
    pub fn fail(&mut self, failure: Failure) -> Result<(), TransitionError> {
        self.transition(failure.kind.terminal_state())?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Finalizes the record
    ///
    /// A run still executing without failure is marked succeeded. Any other
    /// non-terminal state is an error.
    pub fn finish(mut self) -> Result<RunResult, TransitionError> {
        if self.state == RunState::Executing {
            self.transition(RunState::Succeeded)?;
        }

        let status = JobStatus::from_state(self.state).ok_or(TransitionError {
            from: self.state,
            to: RunState::Succeeded,
        })?;

        Ok(RunResult {
            run_id: self.run_id,
            pipeline: self.pipeline,
            job: self.job,
            status,
            failure: self.failure,
            steps: self.steps,
            logs: self.logs,
            started_at: self.started_at,
            completed_at: Utc::now(),
        })
    }
}

/// Results of every job a single event started in one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    pub event: Event,
    pub results: Vec<RunResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn succeeded(&self) -> bool {
        self.results.iter().all(RunResult::succeeded)
    }

    /// Zero when every job succeeded, else the first failing job's code
    pub fn exit_code(&self) -> i32 {
        self.results
            .iter()
            .find(|result| !result.succeeded())
            .map(RunResult::exit_code)
            .unwrap_or(0)
    }

    pub fn result(&self, job: &str) -> Option<&RunResult> {
        self.results.iter().find(|result| result.job == job)
    }
}
