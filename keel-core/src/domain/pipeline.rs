//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::domain::permission::Permissions;
use crate::domain::trigger::Trigger;
use crate::error::DefinitionError;
use crate::template::Template;

/// Pipeline definition
///
/// Loaded once from configuration and shared read-only by every job of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub description: Option<String>,
    pub triggers: Vec<Trigger>,
    /// Variables visible to every step of every job
    pub env: BTreeMap<String, String>,
    pub jobs: Vec<Job>,
}

impl Pipeline {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

/// An ordered, fail-fast sequence of steps with declared permissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub permissions: Permissions,
    pub env: BTreeMap<String, String>,
    /// Per-job ceiling overriding the runner default
    pub timeout_minutes: Option<u64>,
    pub steps: Vec<Step>,
}

impl Job {
    /// Names of every secret referenced by the job's steps
    pub fn required_secrets(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .flat_map(|step| step.secret_references())
            .collect()
    }
}

/// A single executable unit within a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: Option<String>,
    pub name: String,
    /// Overlay applied on top of the job environment; values are templates
    pub env: BTreeMap<String, String>,
    pub kind: StepKind,
}

impl Step {
    /// Keys of the env overlay whose values carry a secret
    pub fn secret_env_keys(&self) -> BTreeSet<&str> {
        self.env
            .iter()
            .filter(|(_, value)| {
                Template::parse(value).is_ok_and(|template| template.secrets().next().is_some())
            })
            .map(|(key, _)| key.as_str())
            .collect()
    }

    fn secret_references(&self) -> Vec<String> {
        let inputs = match &self.kind {
            StepKind::Action { with, .. } => with.values().collect::<Vec<_>>(),
            StepKind::Command { .. } => Vec::new(),
        };

        self.env
            .values()
            .chain(inputs)
            .filter_map(|value| Template::parse(value).ok())
            .flat_map(|template| {
                template
                    .secrets()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Inline shell command
    Command { run: String },
    /// Named reusable action with an input map
    Action {
        action: ActionRef,
        with: BTreeMap<String, String>,
    },
}

/// Reference to a reusable action, pinned to a version: `checkout@v1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionRef {
    pub name: String,
    pub version: String,
}

impl ActionRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for ActionRef {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DefinitionError::InvalidActionRef(s.to_string());

        let (name, version) = s.trim().split_once('@').ok_or_else(invalid)?;

        let name_ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'))
            && !name.starts_with('/')
            && !name.split('/').any(|part| part.is_empty() || part == "..");
        let version_ok = !version.is_empty()
            && version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && version != "."
            && version != "..";

        if name_ok && version_ok {
            Ok(ActionRef::new(name, version))
        } else {
            Err(invalid())
        }
    }
}

impl TryFrom<String> for ActionRef {
    type Error = DefinitionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionRef> for String {
    fn from(action: ActionRef) -> Self {
        action.to_string()
    }
}
