//! Execution context for steps
//!
//! Bundles everything a running step may touch: its environment snapshot,
//! the job workspace, the job log and the job's cancellation token.

use keel_core::domain::log::{LogEntry, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::env::EnvSnapshot;
use crate::secrets::Redactor;
use crate::service::LogBuffer;

/// Redacting writer into a job's log buffer
///
/// Cheap to clone; clones write to the same buffer.
#[derive(Clone)]
pub struct JobLog {
    buffer: Arc<dyn LogBuffer>,
    redactor: Arc<Redactor>,
    step: Option<Arc<str>>,
}

impl JobLog {
    pub fn new(buffer: Arc<dyn LogBuffer>) -> Self {
        Self {
            buffer,
            redactor: Arc::new(Redactor::default()),
            step: None,
        }
    }

    /// Same buffer, redacting with `redactor` from now on
    pub fn with_redactor(&self, redactor: Arc<Redactor>) -> Self {
        Self {
            redactor,
            ..self.clone()
        }
    }

    /// Same buffer, attributing entries to `step`
    pub fn for_step(&self, step: &str) -> Self {
        Self {
            step: Some(Arc::from(step)),
            ..self.clone()
        }
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn write(&self, level: LogLevel, message: &str) {
        self.buffer.add_entry(LogEntry::new(
            level,
            self.step.as_deref(),
            self.redactor.redact(message),
        ));
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Info, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Warning, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Error, message.as_ref());
    }
}

/// What a step runs with
#[derive(Clone)]
pub struct StepContext {
    pub step: String,
    pub env: EnvSnapshot,
    pub workspace: PathBuf,
    pub log: JobLog,
    pub cancel: CancellationToken,
}
