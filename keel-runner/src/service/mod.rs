//! Service layer
//!
//! Trait-based services shared by the orchestrator and the executors.

mod log_buffer;

pub use log_buffer::{InMemoryLogBuffer, LogBuffer};
