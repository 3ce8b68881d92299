//! Lua integration for the runner
//!
//! Connects the generic modules of `keel-lua` to a running step and adds
//! the runner-only `process` module.

mod process;
mod sinks;

pub use process::ProcessModule;
pub use sinks::StepLogSink;

use anyhow::Result;
use keel_lua::{EnvModule, InputModule, LogModule, ModuleRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::{JobLog, StepContext};
use crate::env::EnvSnapshot;
use crate::service::InMemoryLogBuffer;

/// Every module an action sees, bound to `ctx`
pub fn action_registry(ctx: &StepContext, inputs: BTreeMap<String, String>) -> Result<ModuleRegistry> {
    ModuleRegistry::new()
        .with(LogModule::new(StepLogSink::new(ctx.log.clone())))?
        .with(EnvModule::new(ctx.env.clone()))?
        .with(InputModule::new(inputs))?
        .with(ProcessModule::new(ctx))
}

/// LuaLS definitions for action authors
pub fn action_stubs() -> Result<String> {
    let ctx = StepContext {
        step: String::new(),
        env: EnvSnapshot::default(),
        workspace: std::path::PathBuf::new(),
        log: JobLog::new(Arc::new(InMemoryLogBuffer::new())),
        cancel: tokio_util::sync::CancellationToken::new(),
    };
    Ok(action_registry(&ctx, BTreeMap::new())?.generate_stubs())
}
