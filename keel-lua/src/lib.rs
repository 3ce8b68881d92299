//! Keel Lua Infrastructure
//!
//! Reusable actions are Lua scripts evaluated in a restricted sandbox.
//! This crate provides:
//! - Module trait and registry for the globals an action can see
//! - The sandbox itself, with an interrupt hook for cancellation
//! - Core modules: `log`, `env` and `inputs`
//! - Stub generation for editor support

pub mod module;
pub mod modules;
pub mod sandbox;

pub use module::{KeelModule, ModuleMetadata, ModuleRegistry};
pub use modules::{EnvModule, InputModule, LogModule, LogSink, VarProvider};
pub use sandbox::{create_action_sandbox, create_sandbox, install_interrupt};
