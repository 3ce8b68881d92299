//! Core modules available to every action script
//!
//! Each module is generic over a small trait so the runner can back it with
//! the step's log stream and environment while tests use in-memory fakes.

pub mod env;
pub mod input;
pub mod log;

pub use env::{EnvModule, VarProvider};
pub use input::InputModule;
pub use log::{LogModule, LogSink};
