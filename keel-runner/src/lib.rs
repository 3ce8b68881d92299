//! Keel Runner
//!
//! Executes pipelines for an incoming event:
//! - Trigger matching: which pipelines and jobs an event starts
//! - Credential broker: scoped, fail-closed secret resolution
//! - Step executor: inline shell commands and Lua actions behind one trait
//! - Orchestrator: the per-job state machine, parallel jobs, cancellation
//!   and timeouts
//!
//! Both the `keel` CLI and `keel-server` drive pipelines through
//! [`PipelineOrchestrator`].

pub mod config;
pub mod context;
pub mod env;
pub mod executor;
pub mod lua;
pub mod orchestrator;
pub mod render;
pub mod secrets;
pub mod service;
pub mod trigger;

pub use config::RunnerConfig;
pub use env::EnvSnapshot;
pub use executor::{ActionRunner, ExitCode, StepExecutor};
pub use orchestrator::PipelineOrchestrator;
pub use secrets::{BrokerError, CredentialBroker, SecretStore};
pub use trigger::{MatchOutcome, TriggerMatcher};
