//! Log buffer service
//!
//! Collects a job's log entries while it runs. The orchestrator drains the
//! buffer after each phase so entries can be attributed to the step that
//! produced them.

use keel_core::domain::log::LogEntry;
use std::sync::{Arc, Mutex};

pub trait LogBuffer: Send + Sync {
    fn add_entry(&self, entry: LogEntry);

    /// Returns all buffered entries and clears the buffer
    fn drain(&self) -> Vec<LogEntry>;
}

#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBuffer for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        // A poisoned buffer still holds valid entries
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }
}
