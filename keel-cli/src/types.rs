//! Common types used across CLI modules

use anyhow::{Context, Result};
use clap::Args;
use keel_core::domain::trigger::{Event, EventKind};
use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone)]
pub enum IdOrPrefix {
    /// Full UUID
    Full(Uuid),
    /// Prefix that should uniquely identify a resource
    Prefix(String),
}

impl IdOrPrefix {
    /// Parse a string into an IdOrPrefix
    ///
    /// Attempts to parse as a full UUID first, otherwise treats as a prefix
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input) {
            Ok(uuid) => IdOrPrefix::Full(uuid),
            Err(_) => IdOrPrefix::Prefix(input.to_lowercase()),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

/// Event described on the command line
#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// Event kind: push, pull_request, workflow_dispatch or schedule
    #[arg(long = "event", default_value = "push")]
    pub kind: String,

    /// Git ref: refs/heads/<branch>, refs/tags/<tag> or a branch name
    #[arg(long = "ref", default_value = "main")]
    pub git_ref: String,

    /// Repository identity, e.g. org/project
    #[arg(long, env = "KEEL_REPOSITORY", default_value = "local/repository")]
    pub repository: String,

    /// Commit the event points at
    #[arg(long)]
    pub sha: Option<String>,

    /// Changed path, repeatable; path filters are skipped without any
    #[arg(long = "changed")]
    pub changed_paths: Vec<String>,
}

impl EventArgs {
    pub fn to_event(&self) -> Result<Event> {
        let kind: EventKind = self
            .kind
            .parse()
            .with_context(|| format!("Invalid --event '{}'", self.kind))?;

        let mut event = Event::new(kind, &self.repository, &self.git_ref)
            .with_changed_paths(self.changed_paths.clone());
        if let Some(sha) = &self.sha {
            event = event.with_sha(sha);
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_or_prefix() {
        let uuid = Uuid::new_v4();
        assert_eq!(IdOrPrefix::parse(&uuid.to_string()).as_uuid(), Some(uuid));

        let prefix = IdOrPrefix::parse("3F2A");
        assert_eq!(prefix.as_uuid(), None);
        assert_eq!(prefix.to_string(), "3f2a");
    }

    #[test]
    fn test_event_args() {
        let args = EventArgs {
            kind: "pull-request".to_string(),
            git_ref: "refs/heads/feature".to_string(),
            repository: "org/ubi8".to_string(),
            sha: Some("abc123".to_string()),
            changed_paths: vec!["Containerfile".to_string()],
        };
        let event = args.to_event().unwrap();
        assert_eq!(event.kind, EventKind::PullRequest);
        assert_eq!(event.sha.as_deref(), Some("abc123"));
        assert_eq!(event.changed_paths, vec!["Containerfile"]);

        let bad = EventArgs {
            kind: "release".to_string(),
            ..args
        };
        assert!(bad.to_event().is_err());
    }
}
