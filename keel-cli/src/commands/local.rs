//! Local command handlers
//!
//! `run`, `check` and `match` work on a pipeline file without a server.

use anyhow::{Context, Result};
use colored::*;
use keel_core::domain::pipeline::{Pipeline, StepKind};
use keel_core::domain::trigger::Event;
use keel_core::parse_pipeline;
use keel_runner::{PipelineOrchestrator, RunnerConfig, TriggerMatcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::display::print_job_result;
use crate::types::EventArgs;

/// Overrides applied on top of the `KEEL_*` runner configuration
pub struct RunOptions {
    pub force: bool,
    pub secrets: Option<PathBuf>,
    pub actions_dir: Option<PathBuf>,
    pub keep_workspace: bool,
}

impl RunOptions {
    fn apply(self, mut config: RunnerConfig) -> RunnerConfig {
        if let Some(secrets) = self.secrets {
            config.secrets_file = Some(secrets);
        }
        if let Some(dir) = self.actions_dir {
            config.actions_dir = Some(dir);
        }
        config.keep_workspace |= self.keep_workspace;
        config
    }
}

fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_pipeline(&source).with_context(|| format!("Invalid pipeline {}", path.display()))
}

/// Runs a pipeline in this process; Ctrl-C cancels the run
pub async fn run_pipeline(path: &Path, event: &EventArgs, options: RunOptions) -> Result<i32> {
    let pipeline = Arc::new(load_pipeline(path)?);
    let event = event.to_event()?;
    let force = options.force;

    let config = options.apply(RunnerConfig::from_env()?);
    let orchestrator = PipelineOrchestrator::from_config(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling run...".yellow());
            on_interrupt.cancel();
        }
    });

    println!(
        "{} {} for {} {}",
        "Running".bold(),
        pipeline.name.cyan(),
        event.kind,
        event.git_ref
    );
    println!();

    let run = if force {
        orchestrator
            .run(Uuid::new_v4(), pipeline, event, cancel)
            .await
    } else {
        match orchestrator.handle_event(pipeline, event, cancel).await? {
            Some(run) => run,
            None => {
                println!("{}", "Event does not match any trigger; nothing to run.".yellow());
                return Ok(0);
            }
        }
    };

    for result in &run.results {
        print_job_result(result, true);
    }

    let code = run.exit_code();
    if run.succeeded() {
        println!("{}", "✓ Run succeeded".green().bold());
    } else {
        println!("{}", format!("✗ Run failed (exit code {})", code).red().bold());
    }
    Ok(code)
}

/// Validates a definition and prints what it declares
pub fn check_pipeline(path: &Path) -> Result<i32> {
    let pipeline = load_pipeline(path)?;
    println!("{}", describe_pipeline(&pipeline));
    println!("{}", "✓ Pipeline is valid".green().bold());
    Ok(0)
}

fn describe_pipeline(pipeline: &Pipeline) -> String {
    let mut out = format!("{} {}\n", "Pipeline".bold(), pipeline.name.cyan());
    if let Some(description) = &pipeline.description {
        out.push_str(&format!("  {}\n", description.dimmed()));
    }

    out.push_str(&format!("\n{}\n", "Triggers:".bold()));
    for trigger in &pipeline.triggers {
        let filter = &trigger.filter;
        let mut parts = Vec::new();
        for (label, patterns) in [
            ("branches", &filter.branches),
            ("branches_ignore", &filter.branches_ignore),
            ("tags", &filter.tags),
            ("tags_ignore", &filter.tags_ignore),
            ("paths", &filter.paths),
            ("paths_ignore", &filter.paths_ignore),
        ] {
            if !patterns.is_empty() {
                parts.push(format!("{}: {}", label, patterns.join(", ")));
            }
        }
        out.push_str(&format!("  {} {}\n", trigger.kind, parts.join("; ").dimmed()));
    }

    out.push_str(&format!("\n{}\n", "Jobs:".bold()));
    for job in &pipeline.jobs {
        out.push_str(&format!("  {} {}\n", "▸".cyan(), job.name));

        let scopes: Vec<String> = job.permissions.scopes().iter().map(|s| s.to_string()).collect();
        if !scopes.is_empty() {
            out.push_str(&format!("    permissions: {}\n", scopes.join(", ")));
        }
        let secrets: Vec<String> = job.required_secrets().into_iter().collect();
        if !secrets.is_empty() {
            out.push_str(&format!("    secrets:     {}\n", secrets.join(", ")));
        }
        if let Some(minutes) = job.timeout_minutes {
            out.push_str(&format!("    timeout:     {}m\n", minutes));
        }

        for (index, step) in job.steps.iter().enumerate() {
            let what = match &step.kind {
                StepKind::Command { .. } => "run".to_string(),
                StepKind::Action { action, .. } => format!("uses {}", action),
            };
            out.push_str(&format!(
                "    {}. {} {}\n",
                index + 1,
                step.name,
                format!("({})", what).dimmed()
            ));
        }
    }

    out
}

/// Dry-runs trigger matching; exit code 1 when nothing would run
pub fn match_pipeline(path: &Path, event: &EventArgs) -> Result<i32> {
    let pipeline = load_pipeline(path)?;
    let event = event.to_event()?;
    let (matched, jobs) = matched_jobs(&pipeline, &event)?;

    if matched {
        println!(
            "{} {} {} {}",
            "✓".green(),
            pipeline.name.cyan(),
            "would run:".bold(),
            jobs.join(", ")
        );
        Ok(0)
    } else {
        println!(
            "{} {} is not triggered by {} {}",
            "✗".red(),
            pipeline.name.cyan(),
            event.kind,
            event.git_ref
        );
        Ok(1)
    }
}

fn matched_jobs(
    pipeline: &Pipeline,
    event: &Event,
) -> Result<(bool, Vec<String>)> {
    let outcome = TriggerMatcher::evaluate(pipeline, event).context("Invalid event")?;
    let jobs = outcome.jobs.iter().map(|job| job.name.clone()).collect();
    Ok((outcome.is_match(), jobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UBI8: &str = r#"
name: ubi8
on:
  push:
    branches: [main]
jobs:
  ubi8-image:
    permissions:
      packages: write
    steps:
      - name: checkout
        uses: checkout@v1
      - name: login
        run: echo "$TOKEN"
        env:
          TOKEN: ${{ secrets.REGISTRY_TOKEN }}
"#;

    #[test]
    fn test_matched_jobs() {
        let pipeline = parse_pipeline(UBI8).unwrap();

        let (matched, jobs) =
            matched_jobs(&pipeline, &Event::push("org/ubi8", "refs/heads/main")).unwrap();
        assert!(matched);
        assert_eq!(jobs, vec!["ubi8-image"]);

        let (matched, jobs) =
            matched_jobs(&pipeline, &Event::push("org/ubi8", "refs/heads/dev")).unwrap();
        assert!(!matched);
        assert!(jobs.is_empty());

        assert!(matched_jobs(&pipeline, &Event::push("org/ubi8", "")).is_err());
    }

    #[test]
    fn test_describe_pipeline() {
        colored::control::set_override(false);
        let pipeline = parse_pipeline(UBI8).unwrap();
        let text = describe_pipeline(&pipeline);

        assert!(text.contains("push branches: main"));
        assert!(text.contains("permissions: packages:write"));
        assert!(text.contains("secrets:     REGISTRY_TOKEN"));
        assert!(text.contains("1. checkout (uses checkout@v1)"));
        assert!(text.contains("2. login (run)"));
    }

    #[test]
    fn test_load_pipeline_errors() {
        let dir = TempDir::new().unwrap();
        assert!(load_pipeline(&dir.path().join("missing.yml")).is_err());

        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "name: x\n").unwrap();
        let err = load_pipeline(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.yml"));
    }

    #[test]
    fn test_run_options_override_config() {
        let options = RunOptions {
            force: false,
            secrets: Some(PathBuf::from("secrets.yml")),
            actions_dir: None,
            keep_workspace: true,
        };
        let config = options.apply(RunnerConfig::default());
        assert_eq!(config.secrets_file, Some(PathBuf::from("secrets.yml")));
        assert_eq!(config.actions_dir, None);
        assert!(config.keep_workspace);
    }
}
