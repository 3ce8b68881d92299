//! Inline shell commands

use async_trait::async_trait;
use keel_core::domain::log::LogLevel;
use keel_core::domain::run::EXIT_NOT_FOUND;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::warn;

use super::child::{decode_line, kill_group, status_code};
use super::{ActionRunner, ExitCode};
use crate::context::{JobLog, StepContext};

/// A `run:` script executed as `<shell> -e -c <script>`
pub struct ShellCommand {
    shell: String,
    script: String,
}

impl ShellCommand {
    pub fn new(shell: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            script: script.into(),
        }
    }
}

#[async_trait]
impl ActionRunner for ShellCommand {
    fn describe(&self) -> String {
        format!("{} -e -c <script>", self.shell)
    }

    async fn run(&self, ctx: &StepContext) -> ExitCode {
        let mut command = Command::new(&self.shell);
        command
            .arg("-e")
            .arg("-c")
            .arg(&self.script)
            .env_clear()
            .envs(ctx.env.iter())
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                ctx.log
                    .error(format!("Failed to start shell '{}': {}", self.shell, e));
                return ExitCode::Code(EXIT_NOT_FOUND);
            }
        };
        let pid = child.id();

        let readers: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(forward_lines(out, ctx.log.clone(), LogLevel::Info))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(forward_lines(err, ctx.log.clone(), LogLevel::Error))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = tokio::select! {
            status = child.wait() => status,
            _ = ctx.cancel.cancelled() => {
                stop(&mut child, pid, &ctx.step).await;
                for task in &readers {
                    task.abort();
                }
                return ExitCode::Interrupted;
            }
        };

        // Background programs left by the script can keep the pipes open
        // after the shell exits
        let drained = async {
            for task in readers {
                let _ = task.await;
            }
        };
        tokio::select! {
            _ = drained => {}
            _ = ctx.cancel.cancelled() => {
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                return ExitCode::Interrupted;
            }
        }

        match status {
            Ok(status) => ExitCode::Code(status_code(status)),
            Err(e) => {
                ctx.log.error(format!("Failed to wait for step: {}", e));
                ExitCode::Code(1)
            }
        }
    }
}

async fn stop(child: &mut Child, pid: Option<u32>, step: &str) {
    if let Some(pid) = pid {
        kill_group(pid);
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill step '{}': {}", step, e);
    }
}

async fn forward_lines<R>(stream: R, log: JobLog, level: LogLevel)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => log.write(level, &decode_line(&line)),
            Err(e) => {
                warn!("Failed to read step output: {}", e);
                break;
            }
        }
    }
}
