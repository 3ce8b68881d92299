//! Log sink connecting the Lua `log` module to the job log

use keel_core::domain::log::LogLevel;
use keel_lua::LogSink;

use crate::context::JobLog;

/// Writes script messages into the step's log, redacted
pub struct StepLogSink {
    log: JobLog,
}

impl StepLogSink {
    pub fn new(log: JobLog) -> Self {
        Self { log }
    }
}

impl LogSink for StepLogSink {
    fn write(&mut self, level: LogLevel, message: &str) {
        self.log.write(level, message);
    }
}
