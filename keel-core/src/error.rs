//! Error types for definition parsing and event validation

use thiserror::Error;

/// Errors raised while loading a pipeline definition
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The YAML document could not be parsed
    #[error("Invalid pipeline YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Pipeline must have a non-empty 'name'")]
    MissingName,

    #[error("Pipeline '{0}' declares no triggers")]
    NoTriggers(String),

    #[error("Pipeline '{0}' declares no jobs")]
    NoJobs(String),

    #[error("Invalid job name '{0}': use letters, digits, '-' and '_'")]
    InvalidJobName(String),

    #[error("Job '{0}' has no steps")]
    EmptyJob(String),

    /// A step is neither a command nor an action, or is both
    #[error("Job '{job}' step {index}: {reason}")]
    InvalidStep {
        job: String,
        index: usize,
        reason: String,
    },

    #[error("Job '{job}' declares step id '{id}' more than once")]
    DuplicateStepId { job: String, id: String },

    #[error("Invalid action reference '{0}': expected <name>@<version>")]
    InvalidActionRef(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid template in {location}: {reason}")]
    InvalidTemplate { location: String, reason: String },

    /// Secrets may only flow into step env and step inputs
    #[error("Secret '{secret}' cannot be referenced from {location}")]
    SecretNotAllowed { location: String, secret: String },
}

/// Errors raised for malformed event descriptors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("Event has an empty repository")]
    MissingRepository,

    #[error("Event has an empty ref")]
    MissingRef,

    #[error("Event ref '{0}' is malformed")]
    MalformedRef(String),

    #[error("Unknown event kind '{0}'")]
    UnknownKind(String),
}
