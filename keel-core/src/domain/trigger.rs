//! Trigger and event domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EventError;

/// Kind of event that can start a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    WorkflowDispatch,
    Schedule,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::WorkflowDispatch => "workflow_dispatch",
            EventKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pull-request" => Ok(EventKind::PullRequest),
            "workflow_dispatch" | "workflow-dispatch" => Ok(EventKind::WorkflowDispatch),
            "schedule" => Ok(EventKind::Schedule),
            other => Err(EventError::UnknownKind(other.to_string())),
        }
    }
}

/// Incoming event descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// `refs/heads/<branch>`, `refs/tags/<tag>` or a bare branch name
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Repository identity, e.g. `org/project`
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    /// Paths touched by the event, empty when unknown
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_paths: Vec<String>,
}

impl Event {
    pub fn new(kind: EventKind, repository: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: git_ref.into(),
            repository: repository.into(),
            sha: None,
            changed_paths: Vec::new(),
        }
    }

    pub fn push(repository: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self::new(EventKind::Push, repository, git_ref)
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    pub fn with_changed_paths(mut self, paths: Vec<String>) -> Self {
        self.changed_paths = paths;
        self
    }

    /// Rejects descriptors that cannot be matched against any trigger
    pub fn validate(&self) -> Result<(), EventError> {
        if self.repository.trim().is_empty() {
            return Err(EventError::MissingRepository);
        }
        self.ref_name().map(|_| ())
    }

    /// Parses the ref into a branch or tag name
    pub fn ref_name(&self) -> Result<RefName, EventError> {
        RefName::parse(&self.git_ref)
    }
}

/// Branch or tag targeted by an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefName {
    Branch(String),
    Tag(String),
}

impl RefName {
    pub fn parse(git_ref: &str) -> Result<Self, EventError> {
        let git_ref = git_ref.trim();
        if git_ref.is_empty() {
            return Err(EventError::MissingRef);
        }

        let parsed = if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
            RefName::Branch(branch.to_string())
        } else if let Some(tag) = git_ref.strip_prefix("refs/tags/") {
            RefName::Tag(tag.to_string())
        } else if git_ref.starts_with("refs/") {
            return Err(EventError::MalformedRef(git_ref.to_string()));
        } else {
            RefName::Branch(git_ref.to_string())
        };

        if parsed.name().is_empty() || parsed.name().contains(char::is_whitespace) {
            return Err(EventError::MalformedRef(git_ref.to_string()));
        }

        Ok(parsed)
    }

    pub fn name(&self) -> &str {
        match self {
            RefName::Branch(name) | RefName::Tag(name) => name,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            RefName::Branch(name) => Some(name),
            RefName::Tag(_) => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            RefName::Tag(name) => Some(name),
            RefName::Branch(_) => None,
        }
    }
}

/// Condition under which a pipeline runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: EventKind,
    #[serde(default)]
    pub filter: TriggerFilter,
}

impl Trigger {
    pub fn on(kind: EventKind) -> Self {
        Self {
            kind,
            filter: TriggerFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: TriggerFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Ref and path filters of a trigger, all glob patterns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerFilter {
    pub branches: Vec<String>,
    pub branches_ignore: Vec<String>,
    pub tags: Vec<String>,
    pub tags_ignore: Vec<String>,
    pub paths: Vec<String>,
    pub paths_ignore: Vec<String>,
}

impl TriggerFilter {
    pub fn branches<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            branches: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn has_branch_filters(&self) -> bool {
        !self.branches.is_empty() || !self.branches_ignore.is_empty()
    }

    pub fn has_tag_filters(&self) -> bool {
        !self.tags.is_empty() || !self.tags_ignore.is_empty()
    }

    pub fn has_path_filters(&self) -> bool {
        !self.paths.is_empty() || !self.paths_ignore.is_empty()
    }
}
