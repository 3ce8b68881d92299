//! Trigger matching
//!
//! Decides which pipelines an event starts. Matching is pure: it reads the
//! event and the pipeline definitions and nothing else.

use glob_match::glob_match;
use keel_core::domain::pipeline::{Job, Pipeline};
use keel_core::domain::trigger::{Event, RefName, Trigger, TriggerFilter};
use keel_core::error::EventError;
use std::sync::Arc;
use tracing::debug;

/// Result of matching one event against one pipeline
#[derive(Debug)]
pub struct MatchOutcome<'a> {
    /// First trigger that accepted the event
    pub trigger: Option<&'a Trigger>,
    /// Jobs to run, empty when nothing matched
    pub jobs: Vec<&'a Job>,
}

impl MatchOutcome<'_> {
    pub fn is_match(&self) -> bool {
        self.trigger.is_some()
    }
}

/// Matches events against a set of pipelines
#[derive(Debug, Clone, Default)]
pub struct TriggerMatcher {
    pipelines: Vec<Arc<Pipeline>>,
}

impl TriggerMatcher {
    pub fn new(pipelines: Vec<Arc<Pipeline>>) -> Self {
        Self { pipelines }
    }

    pub fn pipelines(&self) -> &[Arc<Pipeline>] {
        &self.pipelines
    }

    /// Pipelines started by `event`, in registration order
    ///
    /// A malformed event is rejected before any pipeline is considered.
    pub fn matching(&self, event: &Event) -> Result<Vec<Arc<Pipeline>>, EventError> {
        event.validate()?;

        let mut matched = Vec::new();
        for pipeline in &self.pipelines {
            if Self::evaluate(pipeline, event)?.is_match() {
                matched.push(Arc::clone(pipeline));
            }
        }
        Ok(matched)
    }

    /// Matches `event` against a single pipeline
    pub fn evaluate<'a>(
        pipeline: &'a Pipeline,
        event: &Event,
    ) -> Result<MatchOutcome<'a>, EventError> {
        event.validate()?;
        let git_ref = event.ref_name()?;

        let trigger = pipeline
            .triggers
            .iter()
            .find(|trigger| trigger_accepts(trigger, event, &git_ref));

        debug!(
            "Event {} {} vs pipeline '{}': {}",
            event.kind,
            event.git_ref,
            pipeline.name,
            if trigger.is_some() { "match" } else { "no match" }
        );

        let jobs = match trigger {
            Some(_) => pipeline.jobs.iter().collect(),
            None => Vec::new(),
        };

        Ok(MatchOutcome { trigger, jobs })
    }
}

fn trigger_accepts(trigger: &Trigger, event: &Event, git_ref: &RefName) -> bool {
    trigger.kind == event.kind
        && ref_accepted(&trigger.filter, git_ref)
        && paths_accepted(&trigger.filter, &event.changed_paths)
}

fn ref_accepted(filter: &TriggerFilter, git_ref: &RefName) -> bool {
    let (include, ignore, own_filters, other_filters) = match git_ref {
        RefName::Branch(_) => (
            &filter.branches,
            &filter.branches_ignore,
            filter.has_branch_filters(),
            filter.has_tag_filters(),
        ),
        RefName::Tag(_) => (
            &filter.tags,
            &filter.tags_ignore,
            filter.has_tag_filters(),
            filter.has_branch_filters(),
        ),
    };

    // A trigger scoped to tags never fires for a branch, and vice versa
    if !own_filters {
        return !other_filters;
    }

    let name = git_ref.name();
    if !include.is_empty() && !selected(include, name) {
        return false;
    }
    !ignore.iter().any(|pattern| glob_match(pattern, name))
}

fn paths_accepted(filter: &TriggerFilter, changed: &[String]) -> bool {
    if changed.is_empty() || !filter.has_path_filters() {
        return true;
    }

    if !filter.paths.is_empty() && !changed.iter().any(|path| selected(&filter.paths, path)) {
        return false;
    }

    if !filter.paths_ignore.is_empty()
        && changed
            .iter()
            .all(|path| filter.paths_ignore.iter().any(|p| glob_match(p, path)))
    {
        return false;
    }

    true
}

/// Evaluates patterns in order; a `!pattern` un-selects an earlier match
fn selected(patterns: &[String], value: &str) -> bool {
    patterns.iter().fold(false, |selected, pattern| {
        match pattern.strip_prefix('!') {
            Some(negated) if glob_match(negated, value) => false,
            Some(_) => selected,
            None => selected || glob_match(pattern, value),
        }
    })
}
