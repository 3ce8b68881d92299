//! `log` module: structured messages from action scripts

use crate::module::{KeelModule, ModuleMetadata};
use keel_core::domain::log::LogLevel;
use mlua::prelude::*;
use std::sync::{Arc, Mutex};

/// Destination of messages logged by a script
///
/// The runner forwards them into the step's log stream.
pub trait LogSink: Send + Sync {
    fn write(&mut self, level: LogLevel, message: &str);
}

pub struct LogModule<S: LogSink> {
    sink: Arc<Mutex<S>>,
}

impl<S: LogSink> LogModule<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

impl<S: LogSink + 'static> KeelModule for LogModule<S> {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        let levels = [
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warning", LogLevel::Warning),
            ("error", LogLevel::Error),
        ];

        for (name, level) in levels {
            let sink = self.sink.clone();
            let function = lua.create_function(move |_, msg: String| {
                sink.lock()
                    .map_err(|e| LuaError::RuntimeError(format!("Failed to lock sink: {}", e)))?
                    .write(level, &msg);
                Ok(())
            })?;
            log_table.set(name, function)?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Logging from Keel actions
---Messages end up in the step's log, with secrets redacted
---@class log
log = {}

---@param msg string
function log.debug(msg) end

---@param msg string
function log.info(msg) end

---@param msg string
function log.warning(msg) end

---@param msg string
function log.error(msg) end
"#
        .to_string()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            id: self.id(),
            version: "1.0.0",
            description: "Step logging for actions",
        }
    }
}
