//! Keel Core
//!
//! Core types and abstractions for the Keel pipeline runner.
//!
//! This crate contains:
//! - Domain types: Pipeline, Trigger, Event, Job, Step, RunResult
//! - Definition parsing: YAML pipeline definitions and their validation
//! - Templates: `${{ ... }}` expressions used in step env and inputs
//! - DTOs: Data transfer objects for the event ingestion API

pub mod definition;
pub mod domain;
pub mod dto;
pub mod error;
pub mod template;

pub use definition::parse_pipeline;
pub use error::DefinitionError;
