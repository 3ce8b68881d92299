//! Pipeline definition parser
//!
//! Parses a YAML pipeline definition into a validated [`Pipeline`]. The raw
//! serde structures mirror the file format; everything past this module only
//! sees validated domain types.
//!
//! # Example
//! ```
//! use keel_core::definition::parse_pipeline;
//!
//! let source = r#"
//! name: ubi8
//! on:
//!   push:
//!     branches: [main]
//! jobs:
//!   ubi8-image:
//!     permissions:
//!       packages: write
//!     steps:
//!       - uses: checkout@v1
//!       - name: build
//!         run: docker build -t ubi8 .
//! "#;
//!
//! let pipeline = parse_pipeline(source)?;
//! assert_eq!(pipeline.jobs[0].name, "ubi8-image");
//! assert_eq!(pipeline.jobs[0].steps.len(), 2);
//! # Ok::<(), keel_core::DefinitionError>(())
//! ```

use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};

use crate::domain::permission::Permissions;
use crate::domain::pipeline::{ActionRef, Job, Pipeline, Step, StepKind};
use crate::domain::trigger::{EventKind, Trigger, TriggerFilter};
use crate::error::DefinitionError;
use crate::template::{Reference, Template};

const MAX_DERIVED_NAME: usize = 40;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPipeline {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    on: Option<RawTriggers>,
    #[serde(default, deserialize_with = "scalar_map")]
    env: BTreeMap<String, String>,
    #[serde(default)]
    jobs: BTreeMap<String, RawJob>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTriggers {
    One(EventKind),
    Many(Vec<EventKind>),
    Filtered(BTreeMap<EventKind, Option<TriggerFilter>>),
}

impl RawTriggers {
    fn into_triggers(self) -> Vec<Trigger> {
        match self {
            RawTriggers::One(kind) => vec![Trigger::on(kind)],
            RawTriggers::Many(kinds) => kinds.into_iter().map(Trigger::on).collect(),
            RawTriggers::Filtered(map) => map
                .into_iter()
                .map(|(kind, filter)| Trigger::on(kind).with_filter(filter.unwrap_or_default()))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJob {
    #[serde(default)]
    permissions: Permissions,
    #[serde(default, deserialize_with = "scalar_map")]
    env: BTreeMap<String, String>,
    #[serde(default)]
    timeout_minutes: Option<u64>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    run: Option<String>,
    #[serde(default)]
    uses: Option<String>,
    #[serde(default, deserialize_with = "scalar_map")]
    with: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "scalar_map")]
    env: BTreeMap<String, String>,
}

/// YAML scalars accepted as env and input values
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s,
        }
    }
}

fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: Option<BTreeMap<String, Scalar>> = Option::deserialize(deserializer)?;
    Ok(map
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.into()))
        .collect())
}

/// Parse and validate a pipeline definition
///
/// # Errors
/// Returns an error if the YAML is invalid or the definition breaks a rule:
/// - name, triggers, jobs and steps must be present
/// - each step is exactly one of `run` or `uses`, actions are version pinned
/// - templates must parse, and secrets may only appear in step `env`/`with`
pub fn parse_pipeline(source: &str) -> Result<Pipeline, DefinitionError> {
    let raw: RawPipeline = serde_yaml::from_str(source)?;

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(DefinitionError::MissingName)?;

    let triggers = raw.on.map(RawTriggers::into_triggers).unwrap_or_default();
    if triggers.is_empty() {
        return Err(DefinitionError::NoTriggers(name));
    }

    if raw.jobs.is_empty() {
        return Err(DefinitionError::NoJobs(name));
    }

    check_templates(&raw.env, "pipeline env", false)?;

    let jobs = raw
        .jobs
        .into_iter()
        .map(|(job_name, job)| build_job(job_name, job))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Pipeline {
        name,
        description: raw.description,
        triggers,
        env: raw.env,
        jobs,
    })
}

fn build_job(name: String, raw: RawJob) -> Result<Job, DefinitionError> {
    if !is_identifier(&name) {
        return Err(DefinitionError::InvalidJobName(name));
    }

    if raw.steps.is_empty() {
        return Err(DefinitionError::EmptyJob(name));
    }

    if raw.timeout_minutes == Some(0) {
        return Err(DefinitionError::InvalidStep {
            job: name,
            index: 0,
            reason: "timeout_minutes must be greater than 0".to_string(),
        });
    }

    check_templates(&raw.env, &format!("job '{}' env", name), false)?;

    let mut seen_ids = HashSet::new();
    let mut steps = Vec::with_capacity(raw.steps.len());

    for (index, raw_step) in raw.steps.into_iter().enumerate() {
        let step = build_step(&name, index, raw_step)?;

        if let Some(id) = &step.id {
            if !seen_ids.insert(id.clone()) {
                return Err(DefinitionError::DuplicateStepId {
                    job: name,
                    id: id.clone(),
                });
            }
        }

        steps.push(step);
    }

    Ok(Job {
        name,
        permissions: raw.permissions,
        env: raw.env,
        timeout_minutes: raw.timeout_minutes,
        steps,
    })
}

fn build_step(job: &str, index: usize, raw: RawStep) -> Result<Step, DefinitionError> {
    let invalid = |reason: &str| DefinitionError::InvalidStep {
        job: job.to_string(),
        index,
        reason: reason.to_string(),
    };

    if raw.id.as_deref().is_some_and(|id| !is_identifier(id)) {
        return Err(invalid("step id may only use letters, digits, '-' and '_'"));
    }

    let kind = match (raw.run, raw.uses) {
        (Some(_), Some(_)) => return Err(invalid("a step cannot have both 'run' and 'uses'")),
        (None, None) => return Err(invalid("a step needs either 'run' or 'uses'")),
        (Some(run), None) => {
            if run.trim().is_empty() {
                return Err(invalid("'run' is empty"));
            }
            if !raw.with.is_empty() {
                return Err(invalid("'with' is only valid for 'uses' steps"));
            }
            check_template(&run, &format!("job '{}' step {} run", job, index), false)?;
            StepKind::Command { run }
        }
        (None, Some(uses)) => {
            let action: ActionRef = uses.parse()?;
            check_templates(
                &raw.with,
                &format!("job '{}' step {} with", job, index),
                true,
            )?;
            StepKind::Action {
                action,
                with: raw.with,
            }
        }
    };

    check_templates(&raw.env, &format!("job '{}' step {} env", job, index), true)?;

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| raw.id.clone())
        .unwrap_or_else(|| derive_step_name(&kind));

    let step = Step {
        id: raw.id,
        name,
        env: raw.env,
        kind,
    };
    check_run_env_references(job, index, &step)?;

    Ok(step)
}

/// `run` text becomes the shell's argv; it may not pull a secret in through
/// the step's own env overlay
fn check_run_env_references(job: &str, index: usize, step: &Step) -> Result<(), DefinitionError> {
    let StepKind::Command { run } = &step.kind else {
        return Ok(());
    };
    let Ok(template) = Template::parse(run) else {
        return Ok(());
    };

    let secret_keys = step.secret_env_keys();
    for reference in template.references() {
        let Reference::Env(name) = reference else {
            continue;
        };
        if !secret_keys.contains(name.as_str()) {
            continue;
        }

        let secret = step
            .env
            .get(name)
            .and_then(|value| Template::parse(value).ok())
            .and_then(|value| value.secrets().next().map(str::to_string))
            .unwrap_or_else(|| name.clone());
        return Err(DefinitionError::SecretNotAllowed {
            location: format!("job '{}' step {} run (through env.{})", job, index, name),
            secret,
        });
    }

    Ok(())
}

fn check_templates(
    values: &BTreeMap<String, String>,
    location: &str,
    secrets_allowed: bool,
) -> Result<(), DefinitionError> {
    for (key, value) in values {
        check_template(value, &format!("{} '{}'", location, key), secrets_allowed)?;
    }
    Ok(())
}

fn check_template(
    value: &str,
    location: &str,
    secrets_allowed: bool,
) -> Result<(), DefinitionError> {
    let template = Template::parse(value).map_err(|e| DefinitionError::InvalidTemplate {
        location: location.to_string(),
        reason: e.to_string(),
    })?;

    if !secrets_allowed {
        if let Some(secret) = template.secrets().next() {
            return Err(DefinitionError::SecretNotAllowed {
                location: location.to_string(),
                secret: secret.to_string(),
            });
        }
    }

    Ok(())
}

fn derive_step_name(kind: &StepKind) -> String {
    match kind {
        StepKind::Action { action, .. } => action.to_string(),
        StepKind::Command { run } => {
            let first_line = run.lines().map(str::trim).find(|l| !l.is_empty());
            let line = first_line.unwrap_or_default();
            if line.chars().count() > MAX_DERIVED_NAME {
                let truncated: String = line.chars().take(MAX_DERIVED_NAME).collect();
                format!("{}...", truncated)
            } else {
                line.to_string()
            }
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
