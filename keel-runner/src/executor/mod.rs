//! Step executor
//!
//! A step is either an inline shell command or a named, versioned action.
//! Both are turned into an [`ActionRunner`] and run the same way: with the
//! step's environment snapshot, inside the job workspace, writing to the job
//! log, until they exit or the job is cancelled.

mod action;
mod catalog;
pub(crate) mod child;
mod command;

pub use action::LuaAction;
pub use catalog::{ActionCatalog, ActionError};
pub use command::ShellCommand;

use async_trait::async_trait;
use keel_core::domain::pipeline::ActionRef;
use keel_core::domain::run::EXIT_NOT_FOUND;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::RunnerConfig;
use crate::context::StepContext;

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// The step ran to completion with this status
    Code(i32),
    /// Cancellation stopped the step before it exited
    Interrupted,
}

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode::Code(0);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitCode::Code(code) => Some(*code),
            ExitCode::Interrupted => None,
        }
    }
}

/// Something a step can run: an inline command or a reusable action
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Short description used in log messages
    fn describe(&self) -> String;

    async fn run(&self, ctx: &StepContext) -> ExitCode;
}

/// A step with all of its templates rendered
///
/// Inputs may carry secret values, so this type is deliberately not `Debug`.
#[derive(Clone)]
pub enum Invocation {
    Command {
        script: String,
    },
    Action {
        action: ActionRef,
        inputs: BTreeMap<String, String>,
    },
}

pub struct StepExecutor {
    shell: String,
    catalog: Arc<ActionCatalog>,
}

impl StepExecutor {
    pub fn new(shell: impl Into<String>, catalog: ActionCatalog) -> Self {
        Self {
            shell: shell.into(),
            catalog: Arc::new(catalog),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(
            config.shell.clone(),
            ActionCatalog::new(config.actions_dir.clone()),
        )
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    /// Builds the runner for an invocation, looking actions up in the catalog
    pub fn runner_for(&self, invocation: &Invocation) -> Result<Box<dyn ActionRunner>, ActionError> {
        match invocation {
            Invocation::Command { script } => {
                Ok(Box::new(ShellCommand::new(self.shell.clone(), script.clone())))
            }
            Invocation::Action { action, inputs } => {
                let source = self.catalog.resolve(action)?;
                Ok(Box::new(LuaAction::new(
                    action.clone(),
                    source,
                    inputs.clone(),
                )))
            }
        }
    }

    /// Runs one step to completion
    ///
    /// A step whose command or action cannot be found exits with 127.
    pub async fn run(&self, invocation: &Invocation, ctx: &StepContext) -> ExitCode {
        let runner = match self.runner_for(invocation) {
            Ok(runner) => runner,
            Err(e) => {
                ctx.log.error(e.to_string());
                return ExitCode::Code(EXIT_NOT_FOUND);
            }
        };

        debug!("Step '{}': running {}", ctx.step, runner.describe());
        runner.run(ctx).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::context::JobLog;
    use crate::env::EnvSnapshot;
    use crate::service::{InMemoryLogBuffer, LogBuffer};
    use keel_core::domain::log::LogEntry;
    use tokio_util::sync::CancellationToken;

    pub struct Harness {
        pub ctx: StepContext,
        pub buffer: InMemoryLogBuffer,
        pub workspace: tempfile::TempDir,
    }

    impl Harness {
        pub fn new(vars: &[(&str, &str)]) -> Self {
            let workspace = tempfile::tempdir().unwrap();
            let buffer = InMemoryLogBuffer::new();
            let mut env = EnvSnapshot::inherited(&["PATH".to_string()], &[]);
            env = env.overlay(vars.iter().copied());
            let ctx = StepContext {
                step: "test".to_string(),
                env,
                workspace: workspace.path().to_path_buf(),
                log: JobLog::new(Arc::new(buffer.clone())).for_step("test"),
                cancel: CancellationToken::new(),
            };
            Self {
                ctx,
                buffer,
                workspace,
            }
        }

        pub fn messages(&self) -> Vec<String> {
            self.buffer
                .drain()
                .into_iter()
                .map(|entry: LogEntry| entry.message)
                .collect()
        }
    }

    /// Waits up to two seconds for `pid` to exit; zombies count as exited
    #[cfg(target_os = "linux")]
    pub fn process_exits(pid: &str) -> bool {
        for _ in 0..100 {
            let running = std::fs::read_to_string(format!("/proc/{}/stat", pid))
                .map(|stat| !stat.contains(") Z"))
                .unwrap_or(false);
            if !running {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        false
    }
}
