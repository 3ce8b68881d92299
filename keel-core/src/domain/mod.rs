//! Core domain types
//!
//! This module contains the domain structures shared across Keel crates.
//! The runner executes them, the server stores and exposes them, and the
//! CLI renders them.

pub mod log;
pub mod permission;
pub mod pipeline;
pub mod run;
pub mod trigger;
