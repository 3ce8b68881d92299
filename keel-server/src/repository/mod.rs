//! Repository Module
//!
//! Data access layer for the server.

pub mod run;

// Re-export for convenience
pub use run as run_repository;
