//! Service Module
//!
//! Business logic layer for the server.
//! Services orchestrate between repositories and the pipeline runner.

pub mod pipeline;
pub mod run;

// Re-export for convenience
pub use pipeline as pipeline_service;
pub use run as run_service;
