//! `process` module: run programs from an action
//!
//! Programs get the step's environment and run inside the job workspace.
//! Output is forwarded to the step log line by line unless the script asks
//! to capture it. Cancelling the job kills the program and aborts the
//! script.

use keel_core::domain::log::LogLevel;
use keel_core::domain::run::EXIT_NOT_FOUND;
use keel_lua::sandbox::INTERRUPTED;
use keel_lua::{KeelModule, ModuleMetadata};
use mlua::prelude::*;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{JobLog, StepContext};
use crate::env::EnvSnapshot;
use crate::executor::child::{decode_line, kill_group, status_code};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

struct ProcessHost {
    workspace: PathBuf,
    env: EnvSnapshot,
    log: JobLog,
    cancel: CancellationToken,
}

pub struct ProcessModule {
    host: Arc<ProcessHost>,
}

impl ProcessModule {
    pub fn new(ctx: &StepContext) -> Self {
        Self {
            host: Arc::new(ProcessHost {
                workspace: ctx.workspace.clone(),
                env: ctx.env.clone(),
                log: ctx.log.clone(),
                cancel: ctx.cancel.clone(),
            }),
        }
    }
}

struct ProcessRequest {
    cmd: String,
    args: Vec<String>,
    cwd: Option<String>,
    env: BTreeMap<String, String>,
    capture_stdout: bool,
    capture_stderr: bool,
}

impl ProcessRequest {
    fn from_table(options: &LuaTable) -> LuaResult<Self> {
        let cmd: String = options.get::<Option<String>>("cmd")?.ok_or_else(|| {
            LuaError::RuntimeError("process.run requires a 'cmd' field".to_string())
        })?;

        Ok(Self {
            cmd,
            args: options.get::<Option<Vec<String>>>("args")?.unwrap_or_default(),
            cwd: options.get("cwd")?,
            env: options
                .get::<Option<BTreeMap<String, String>>>("env")?
                .unwrap_or_default(),
            capture_stdout: options.get::<Option<bool>>("capture_stdout")?.unwrap_or(false),
            capture_stderr: options.get::<Option<bool>>("capture_stderr")?.unwrap_or(false),
        })
    }
}

struct ProcessOutput {
    exit_code: i32,
    stdout: Option<String>,
    stderr: Option<String>,
}

impl ProcessHost {
    fn resolve_cwd(&self, cwd: Option<&str>) -> PathBuf {
        match cwd.map(Path::new) {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.workspace.join(dir),
            None => self.workspace.clone(),
        }
    }

    fn run(&self, request: ProcessRequest) -> LuaResult<ProcessOutput> {
        let cwd = self.resolve_cwd(request.cwd.as_deref());
        debug!("process.run: {} in {}", request.cmd, cwd.display());

        let mut command = Command::new(&request.cmd);
        command
            .args(&request.args)
            .env_clear()
            .envs(self.env.iter())
            .envs(&request.env)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.log
                    .error(format!("Failed to start '{}': {}", request.cmd, e));
                return Ok(ProcessOutput {
                    exit_code: EXIT_NOT_FOUND,
                    stdout: request.capture_stdout.then(String::new),
                    stderr: request.capture_stderr.then(String::new),
                });
            }
        };
        let pid = child.id();

        let stdout = child.stdout.take().map(|stream| {
            self.spawn_reader(stream, request.capture_stdout, LogLevel::Info)
        });
        let stderr = child.stderr.take().map(|stream| {
            self.spawn_reader(stream, request.capture_stderr, LogLevel::Error)
        });

        let status = loop {
            if let Some(status) = child.try_wait().map_err(LuaError::external)? {
                break status;
            }
            if self.cancel.is_cancelled() {
                kill_group(pid);
                let _ = child.kill();
                let _ = child.wait();
                return Err(interrupted());
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        // Programs started in the background can hold the pipes open after
        // the direct child exits
        while [&stdout, &stderr]
            .into_iter()
            .flatten()
            .any(|reader| !reader.is_finished())
        {
            if self.cancel.is_cancelled() {
                kill_group(pid);
                return Err(interrupted());
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let stdout = join_reader(stdout)?;
        let stderr = join_reader(stderr)?;

        Ok(ProcessOutput {
            exit_code: status_code(status),
            stdout: request.capture_stdout.then_some(stdout),
            stderr: request.capture_stderr.then_some(stderr),
        })
    }

    fn spawn_reader<R>(&self, stream: R, capture: bool, level: LogLevel) -> JoinHandle<String>
    where
        R: Read + Send + 'static,
    {
        let log = self.log.clone();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut captured = String::new();
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) if capture => {
                        captured.push_str(&decode_line(&line));
                        captured.push('\n');
                    }
                    Ok(_) => log.write(level, &decode_line(&line)),
                    Err(e) => {
                        debug!("process output read failed: {}", e);
                        break;
                    }
                }
            }
            captured
        })
    }
}

fn interrupted() -> LuaError {
    LuaError::RuntimeError(INTERRUPTED.to_string())
}

fn join_reader(reader: Option<JoinHandle<String>>) -> LuaResult<String> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| LuaError::RuntimeError("process output reader panicked".to_string())),
        None => Ok(String::new()),
    }
}

impl KeelModule for ProcessModule {
    fn id(&self) -> &'static str {
        "process"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let process_table = lua.create_table()?;

        let host = self.host.clone();
        process_table.set(
            "run",
            lua.create_function(move |lua, options: LuaTable| {
                let output = host.run(ProcessRequest::from_table(&options)?)?;

                let result = lua.create_table()?;
                result.set("exit_code", output.exit_code)?;
                result.set("success", output.exit_code == 0)?;
                if let Some(stdout) = output.stdout {
                    result.set("stdout", stdout)?;
                }
                if let Some(stderr) = output.stderr {
                    result.set("stderr", stderr)?;
                }
                Ok(result)
            })?,
        )?;

        lua.globals().set(self.id(), process_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Run programs from an action
---Programs inherit the step environment and run in the job workspace
---@class process
process = {}

---@class ProcessOptions
---@field cmd string Program to run, looked up on PATH
---@field args? string[]
---@field cwd? string Directory relative to the workspace
---@field env? table<string, string> Extra variables for this program only
---@field capture_stdout? boolean Return stdout instead of logging it
---@field capture_stderr? boolean Return stderr instead of logging it

---@class ProcessResult
---@field exit_code integer 127 when the program could not be started
---@field success boolean
---@field stdout? string
---@field stderr? string

---Run a program and wait for it to exit
---@param options ProcessOptions
---@return ProcessResult
---
---@usage
---local result = process.run({ cmd = "git", args = { "rev-parse", "HEAD" }, capture_stdout = true })
function process.run(options) end
"#
        .to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Program execution for actions",
        }
    }
}
