//! Pipeline orchestrator
//!
//! Drives every job of a matched pipeline through the run state machine:
//!
//! 1. Authorizing: resolve the job's secrets against its permissions. Any
//!    failure ends the job as failed before a single step runs.
//! 2. Executing: prepare the workspace and environment, then run the steps
//!    in order, stopping at the first one that does not succeed.
//!
//! Jobs of one pipeline run as parallel tasks sharing the pipeline through an
//! `Arc`, bounded by a semaphore shared across runs. Each job gets a child
//! cancellation token so a timeout stops that job only.

use chrono::Utc;
use keel_core::domain::pipeline::{Job, Pipeline, Step, StepKind};
use keel_core::domain::run::{
    EXIT_CANCELLED, EXIT_TIMED_OUT, Failure, FailureKind, PipelineRun, RunRecorder, RunResult,
    RunState, StepOutcome, TransitionError,
};
use keel_core::domain::trigger::{Event, RefName};
use keel_core::error::EventError;
use keel_core::template::TemplateError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::context::{JobLog, StepContext};
use crate::env::EnvSnapshot;
use crate::executor::{ExitCode, Invocation, StepExecutor};
use crate::render::RenderContext;
use crate::secrets::{CredentialBroker, ResolvedSecrets, SecretStore};
use crate::service::{InMemoryLogBuffer, LogBuffer};
use crate::trigger::TriggerMatcher;

/// Runs matched pipelines
///
/// Cheap to clone; clones share the job slots.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    config: Arc<RunnerConfig>,
    broker: CredentialBroker,
    executor: Arc<StepExecutor>,
    slots: Arc<Semaphore>,
}

impl PipelineOrchestrator {
    pub fn new(config: RunnerConfig, broker: CredentialBroker, executor: StepExecutor) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_parallel_jobs.max(1)));
        Self {
            config: Arc::new(config),
            broker,
            executor: Arc::new(executor),
            slots,
        }
    }

    /// Builds the broker and executor described by `config`
    pub fn from_config(config: RunnerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store = match &config.secrets_file {
            Some(path) => SecretStore::from_file(path)?,
            None => SecretStore::new(),
        };
        info!("Loaded {} secret definition(s)", store.len());

        let executor = StepExecutor::from_config(&config);
        Ok(Self::new(config, CredentialBroker::new(store), executor))
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    /// Matches `event` against `pipeline` and runs it on a match
    ///
    /// Returns `Ok(None)` when the pipeline's triggers do not accept the
    /// event. A malformed event is rejected without running anything.
    pub async fn handle_event(
        &self,
        pipeline: Arc<Pipeline>,
        event: Event,
        cancel: CancellationToken,
    ) -> Result<Option<PipelineRun>, EventError> {
        if !TriggerMatcher::evaluate(&pipeline, &event)?.is_match() {
            info!(
                "Pipeline '{}' not triggered by {} {}",
                pipeline.name, event.kind, event.git_ref
            );
            return Ok(None);
        }

        Ok(Some(self.run(Uuid::new_v4(), pipeline, event, cancel).await))
    }

    /// Runs every job of `pipeline` for an already matched event
    pub async fn run(
        &self,
        run_id: Uuid,
        pipeline: Arc<Pipeline>,
        event: Event,
        cancel: CancellationToken,
    ) -> PipelineRun {
        let started_at = Utc::now();
        let event = Arc::new(event);

        info!(
            "Run {}: pipeline '{}' started with {} job(s)",
            run_id,
            pipeline.name,
            pipeline.jobs.len()
        );

        let mut tasks = JoinSet::new();
        for index in 0..pipeline.jobs.len() {
            let this = self.clone();
            let pipeline = Arc::clone(&pipeline);
            let event = Arc::clone(&event);
            let cancel = cancel.child_token();
            tasks.spawn(async move {
                let result = this.run_job(run_id, &pipeline, index, &event, cancel).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<RunResult>> = vec![None; pipeline.jobs.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(result))) => slots[index] = Some(result),
                Ok((index, Err(e))) => {
                    error!(
                        "Run {}: job '{}' left the state machine: {}",
                        run_id, pipeline.jobs[index].name, e
                    );
                }
                Err(e) => error!("Run {}: job task failed: {}", run_id, e),
            }
        }

        let results = slots
            .into_iter()
            .zip(&pipeline.jobs)
            .filter_map(|(result, job)| {
                result.or_else(|| aborted_result(run_id, &pipeline.name, &job.name))
            })
            .collect::<Vec<_>>();

        let run = PipelineRun {
            id: run_id,
            pipeline: pipeline.name.clone(),
            event: (*event).clone(),
            results,
            started_at,
            completed_at: Utc::now(),
        };

        info!(
            "Run {}: pipeline '{}' finished with exit code {}",
            run_id,
            pipeline.name,
            run.exit_code()
        );
        run
    }

    async fn run_job(
        &self,
        run_id: Uuid,
        pipeline: &Pipeline,
        index: usize,
        event: &Event,
        cancel: CancellationToken,
    ) -> Result<RunResult, TransitionError> {
        let job = &pipeline.jobs[index];
        let mut recorder = RunRecorder::new(run_id, &pipeline.name, &job.name);
        recorder.transition(RunState::Matching)?;
        recorder.transition(RunState::Authorizing)?;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.slots).acquire_owned() => permit.ok(),
        };
        if permit.is_none() {
            recorder.fail(interruption(None, false, Duration::ZERO))?;
            return recorder.finish();
        }

        let timeout = job
            .timeout_minutes
            .map(|minutes| Duration::from_secs(minutes * 60))
            .unwrap_or(self.config.job_timeout);
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = spawn_watchdog(timeout, cancel.clone(), Arc::clone(&timed_out));

        let buffer = Arc::new(InMemoryLogBuffer::new());
        let mut job_run = JobRun {
            run_id,
            pipeline,
            job,
            event,
            buffer: Arc::clone(&buffer),
            log: JobLog::new(buffer),
            cancel,
            timed_out,
            timeout,
        };

        let outcome = self.execute_job(&mut recorder, &mut job_run).await;
        watchdog.abort();
        drop(permit);
        outcome?;

        let result = recorder.finish()?;
        info!(
            "Run {}: job '{}' {} ({} step(s))",
            run_id,
            job.name,
            result.status(),
            result.steps().len()
        );
        Ok(result)
    }

    async fn execute_job(
        &self,
        recorder: &mut RunRecorder,
        run: &mut JobRun<'_>,
    ) -> Result<(), TransitionError> {
        let job = run.job;
        run.log.info(format!("Job '{}' started", job.name));

        if run.cancel.is_cancelled() {
            recorder.push_logs(run.buffer.drain());
            return recorder.fail(run.interruption(None));
        }

        let required = job.required_secrets();
        let secrets = match self.broker.resolve_all(&required, &job.permissions) {
            Ok(secrets) => secrets,
            Err(e) => {
                warn!("Run {}: job '{}' not authorized: {}", run.run_id, job.name, e);
                run.log.error(e.to_string());
                recorder.push_logs(run.buffer.drain());
                return recorder.fail(Failure {
                    kind: FailureKind::AuthorizationDenied,
                    step: None,
                    exit_code: 1,
                    message: e.to_string(),
                });
            }
        };
        if !secrets.is_empty() {
            debug!(
                "Run {}: job '{}' resolved {} secret(s)",
                run.run_id,
                job.name,
                secrets.len()
            );
        }
        run.log = run.log.with_redactor(Arc::new(secrets.redactor()));

        let workspace = self
            .config
            .workspace_base
            .join(run.run_id.to_string())
            .join(&job.name);
        if let Err(e) = tokio::fs::create_dir_all(&workspace).await {
            let message = format!("Cannot create workspace {}: {}", workspace.display(), e);
            run.log.error(&message);
            recorder.push_logs(run.buffer.drain());
            return recorder.fail(setup_failure(message));
        }

        let outcome = self.execute_in(recorder, run, &secrets, &workspace).await;
        self.remove_workspace(&workspace).await;
        outcome
    }

    async fn execute_in(
        &self,
        recorder: &mut RunRecorder,
        run: &JobRun<'_>,
        secrets: &ResolvedSecrets,
        workspace: &Path,
    ) -> Result<(), TransitionError> {
        let env = match self.job_env(run, workspace) {
            Ok(env) => env,
            Err(e) => {
                let message = format!("Cannot prepare job environment: {}", e);
                run.log.error(&message);
                recorder.push_logs(run.buffer.drain());
                return recorder.fail(setup_failure(message));
            }
        };

        recorder.push_logs(run.buffer.drain());
        recorder.transition(RunState::Executing)?;

        for step in &run.job.steps {
            if run.cancel.is_cancelled() {
                recorder.push_logs(run.buffer.drain());
                return recorder.fail(run.interruption(None));
            }

            let started_at = Utc::now();
            let log = run.log.for_step(&step.name);

            let exit = match prepare_step(step, &env, run.event, secrets) {
                Ok((step_env, invocation)) => {
                    let ctx = StepContext {
                        step: step.name.clone(),
                        env: step_env,
                        workspace: workspace.to_path_buf(),
                        log: log.clone(),
                        cancel: run.cancel.clone(),
                    };
                    self.executor.run(&invocation, &ctx).await
                }
                Err(e) => {
                    log.error(format!("Cannot render step: {}", e));
                    ExitCode::Code(1)
                }
            };

            let logs = run.buffer.drain();
            match exit {
                ExitCode::Code(0) => {
                    recorder.record_step(&step.name, StepOutcome::Succeeded, Some(0), started_at, logs);
                }
                ExitCode::Code(code) => {
                    recorder.record_step(&step.name, StepOutcome::Failed, Some(code), started_at, logs);
                    let message = format!("Step '{}' failed with exit code {}", step.name, code);
                    return recorder.fail(Failure {
                        kind: FailureKind::StepFailed,
                        step: Some(step.name.clone()),
                        exit_code: code,
                        message: run.log.redactor().redact(&message),
                    });
                }
                ExitCode::Interrupted => {
                    recorder.record_step(&step.name, StepOutcome::Cancelled, None, started_at, logs);
                    return recorder.fail(run.interruption(Some(&step.name)));
                }
            }
        }

        Ok(())
    }

    /// Inherited variables, then pipeline env, job env and `KEEL_*` context
    ///
    /// Pipeline and job values may reference anything from the layers below
    /// them and the context variables.
    fn job_env(&self, run: &JobRun<'_>, workspace: &Path) -> Result<EnvSnapshot, TemplateError> {
        let excluded = self.broker.store().source_env_vars();
        let context = context_vars(run, workspace);

        let mut env = EnvSnapshot::inherited(&self.config.inherit_env, &excluded);
        for layer in [&run.pipeline.env, &run.job.env] {
            let lookup = env.overlay(context.clone());
            let rendered = RenderContext::new(&lookup, run.event).render_map(layer)?;
            env = env.overlay(rendered);
        }
        Ok(env.overlay(context))
    }

    async fn remove_workspace(&self, workspace: &Path) {
        if self.config.keep_workspace {
            debug!("Keeping workspace {}", workspace.display());
            return;
        }

        if let Err(e) = tokio::fs::remove_dir_all(workspace).await {
            warn!("Failed to remove workspace {}: {}", workspace.display(), e);
        }
        // Fails while sibling jobs still hold their workspaces
        if let Some(run_dir) = workspace.parent() {
            let _ = tokio::fs::remove_dir(run_dir).await;
        }
    }
}

/// Per-job state shared by the execution phases
struct JobRun<'a> {
    run_id: Uuid,
    pipeline: &'a Pipeline,
    job: &'a Job,
    event: &'a Event,
    buffer: Arc<InMemoryLogBuffer>,
    log: JobLog,
    cancel: CancellationToken,
    timed_out: Arc<AtomicBool>,
    timeout: Duration,
}

impl JobRun<'_> {
    fn interruption(&self, step: Option<&str>) -> Failure {
        interruption(step, self.timed_out.load(Ordering::SeqCst), self.timeout)
    }
}

fn interruption(step: Option<&str>, timed_out: bool, timeout: Duration) -> Failure {
    let during = step
        .map(|name| format!(" during step '{}'", name))
        .unwrap_or_default();

    if timed_out {
        Failure {
            kind: FailureKind::TimedOut,
            step: step.map(str::to_string),
            exit_code: EXIT_TIMED_OUT,
            message: format!("Job exceeded its timeout of {:?}{}", timeout, during),
        }
    } else {
        Failure {
            kind: FailureKind::Cancelled,
            step: step.map(str::to_string),
            exit_code: EXIT_CANCELLED,
            message: format!("Job cancelled{}", during),
        }
    }
}

fn setup_failure(message: String) -> Failure {
    Failure {
        kind: FailureKind::Setup,
        step: None,
        exit_code: 1,
        message,
    }
}

/// Failed result for a job whose task died before it could report
fn aborted_result(run_id: Uuid, pipeline: &str, job: &str) -> Option<RunResult> {
    let mut recorder = RunRecorder::new(run_id, pipeline, job);
    recorder.transition(RunState::Matching).ok()?;
    recorder.transition(RunState::Authorizing).ok()?;
    recorder
        .fail(setup_failure("Job aborted unexpectedly".to_string()))
        .ok()?;
    recorder.finish().ok()
}

/// Cancels `cancel` once `timeout` elapses, flagging the expiry
fn spawn_watchdog(
    timeout: Duration,
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                fired.store(true, Ordering::SeqCst);
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}

fn context_vars(run: &JobRun<'_>, workspace: &Path) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::from([
        ("CI".to_string(), "true".to_string()),
        ("KEEL_RUN_ID".to_string(), run.run_id.to_string()),
        ("KEEL_PIPELINE".to_string(), run.pipeline.name.clone()),
        ("KEEL_JOB".to_string(), run.job.name.clone()),
        ("KEEL_WORKSPACE".to_string(), workspace.display().to_string()),
        ("KEEL_EVENT".to_string(), run.event.kind.to_string()),
        ("KEEL_REF".to_string(), run.event.git_ref.clone()),
        ("KEEL_REPOSITORY".to_string(), run.event.repository.clone()),
    ]);

    match run.event.ref_name() {
        Ok(RefName::Branch(name)) => {
            vars.insert("KEEL_BRANCH".to_string(), name);
        }
        Ok(RefName::Tag(name)) => {
            vars.insert("KEEL_TAG".to_string(), name);
        }
        Err(_) => {}
    }
    if let Some(sha) = &run.event.sha {
        vars.insert("KEEL_SHA".to_string(), sha.clone());
    }
    vars
}

/// Renders a step against the job environment
///
/// The step's env overlay is rendered against the job environment; its
/// command or inputs against the resulting step environment. Secrets are
/// only substituted into the overlay and action inputs; command text is
/// rendered without the overlay entries that carry them.
fn prepare_step(
    step: &Step,
    env: &EnvSnapshot,
    event: &Event,
    secrets: &ResolvedSecrets,
) -> Result<(EnvSnapshot, Invocation), TemplateError> {
    let overlay = RenderContext::new(env, event)
        .with_secrets(secrets)
        .render_map(&step.env)?;
    let step_env = env.overlay(&overlay);

    let invocation = match &step.kind {
        StepKind::Command { run } => {
            let secret_keys = step.secret_env_keys();
            let visible = overlay
                .iter()
                .filter(|(key, _)| !secret_keys.contains(key.as_str()));
            Invocation::Command {
                script: RenderContext::new(&env.overlay(visible), event).render(run)?,
            }
        }
        StepKind::Action { action, with } => Invocation::Action {
            action: action.clone(),
            inputs: RenderContext::new(&step_env, event)
                .with_secrets(secrets)
                .render_map(with)?,
        },
    };

    Ok((step_env, invocation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::permission::{Access, Scope};
    use keel_core::domain::run::{FailureKind, JobStatus};
    use keel_core::parse_pipeline;
    use crate::executor::ActionCatalog;
    use crate::secrets::{SecretDefinition, SecretSource};
    use tempfile::TempDir;

    const TOKEN: &str = "quay-token-5f1e2d";

    fn ubi8(build: &str, packages: &str) -> Arc<Pipeline> {
        let source = format!(
            r#"
name: ubi8
on:
  push:
    branches: [main]
env:
  IMAGE: quay.io/org/ubi8
jobs:
  ubi8-image:
    permissions:
      contents: read
      packages: {packages}
    steps:
      - name: checkout
        run: echo checkout
      - name: build
        run: {build}
      - name: login
        run: echo "login with $TOKEN"
        env:
          TOKEN: ${{{{ secrets.REGISTRY_TOKEN }}}}
      - name: push
        run: echo "pushed $IMAGE"
"#
        );
        Arc::new(parse_pipeline(&source).unwrap())
    }

    fn store() -> SecretStore {
        SecretStore::new().with(
            "REGISTRY_TOKEN",
            SecretDefinition::new(
                Scope::new("packages", Access::Write),
                SecretSource::Value(TOKEN.to_string()),
            ),
        )
    }

    fn orchestrator_with(config: RunnerConfig, catalog: ActionCatalog) -> PipelineOrchestrator {
        let executor = StepExecutor::new(config.shell.clone(), catalog);
        PipelineOrchestrator::new(config, CredentialBroker::new(store()), executor)
    }

    fn orchestrator(base: &TempDir) -> PipelineOrchestrator {
        orchestrator_with(test_config(base), ActionCatalog::default())
    }

    fn test_config(base: &TempDir) -> RunnerConfig {
        RunnerConfig {
            workspace_base: base.path().to_path_buf(),
            inherit_env: vec!["PATH".to_string()],
            ..RunnerConfig::default()
        }
    }

    fn push(branch: &str) -> Event {
        Event::push("org/ubi8", format!("refs/heads/{}", branch)).with_sha("abc123")
    }

    fn messages(result: &RunResult) -> Vec<&str> {
        result.logs().iter().map(|e| e.message.as_str()).collect()
    }

    #[tokio::test]
    async fn test_push_main_runs_ubi8_image() {
        let base = TempDir::new().unwrap();
        let run = orchestrator(&base)
            .handle_event(ubi8("echo build", "write"), push("main"), CancellationToken::new())
            .await
            .unwrap()
            .expect("push to main triggers the pipeline");

        assert!(run.succeeded());
        assert_eq!(run.exit_code(), 0);
        assert_eq!(run.results.len(), 1);

        let result = run.result("ubi8-image").unwrap();
        assert_eq!(result.status(), JobStatus::Succeeded);
        assert_eq!(
            result.executed_steps(),
            vec!["checkout", "build", "login", "push"]
        );
        assert!(messages(result).contains(&"pushed quay.io/org/ubi8"));
    }

    #[tokio::test]
    async fn test_push_dev_runs_nothing() {
        let base = TempDir::new().unwrap();
        let run = orchestrator(&base)
            .handle_event(ubi8("echo build", "write"), push("dev"), CancellationToken::new())
            .await
            .unwrap();

        assert!(run.is_none());
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_event_rejected() {
        let base = TempDir::new().unwrap();
        let result = orchestrator(&base)
            .handle_event(
                ubi8("echo build", "write"),
                Event::push("org/ubi8", "refs/heads/"),
                CancellationToken::new(),
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failing_build_stops_job() {
        let base = TempDir::new().unwrap();
        let run = orchestrator(&base)
            .run(
                Uuid::new_v4(),
                ubi8("exit 3", "write"),
                push("main"),
                CancellationToken::new(),
            )
            .await;

        assert!(!run.succeeded());
        assert_eq!(run.exit_code(), 3);

        let result = run.result("ubi8-image").unwrap();
        assert_eq!(result.status(), JobStatus::Failed);
        assert_eq!(result.executed_steps(), vec!["checkout", "build"]);

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::StepFailed);
        assert_eq!(failure.step.as_deref(), Some("build"));
        assert_eq!(failure.exit_code, 3);
        assert_eq!(result.steps()[1].outcome, StepOutcome::Failed);
    }

    #[tokio::test]
    async fn test_middle_step_failure_records_two_steps() {
        let pipeline = Arc::new(
            parse_pipeline(
                r#"
name: abc
on: push
jobs:
  seq:
    steps:
      - name: A
        run: touch a
      - name: B
        run: "false"
      - name: C
        run: touch c
"#,
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let config = RunnerConfig {
            keep_workspace: true,
            ..test_config(&base)
        };
        let run_id = Uuid::new_v4();
        let run = orchestrator_with(config, ActionCatalog::default())
            .run(run_id, pipeline, push("main"), CancellationToken::new())
            .await;

        let result = run.result("seq").unwrap();
        assert_eq!(result.executed_steps(), vec!["A", "B"]);
        assert_eq!(result.exit_code(), 1);

        let workspace = base.path().join(run_id.to_string()).join("seq");
        assert!(workspace.join("a").exists());
        assert!(!workspace.join("c").exists());
    }

    #[tokio::test]
    async fn test_missing_scope_denies_before_any_step() {
        let base = TempDir::new().unwrap();
        let run = orchestrator(&base)
            .run(
                Uuid::new_v4(),
                ubi8("echo build", "read"),
                push("main"),
                CancellationToken::new(),
            )
            .await;

        let result = run.result("ubi8-image").unwrap();
        assert_eq!(result.status(), JobStatus::Failed);
        assert!(result.steps().is_empty());

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::AuthorizationDenied);
        assert!(failure.message.contains("packages:write"));
        assert!(!failure.message.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_undefined_secret_fails_closed() {
        let pipeline = Arc::new(
            parse_pipeline(
                r#"
name: p
on: push
jobs:
  publish:
    permissions:
      packages: write
    steps:
      - run: echo "$KEY"
        env:
          KEY: ${{ secrets.SIGNING_KEY }}
"#,
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let run = orchestrator(&base)
            .run(Uuid::new_v4(), pipeline, push("main"), CancellationToken::new())
            .await;

        let result = run.result("publish").unwrap();
        assert!(result.steps().is_empty());
        assert_eq!(
            result.failure().unwrap().kind,
            FailureKind::AuthorizationDenied
        );
    }

    #[tokio::test]
    async fn test_secrets_stay_with_their_job() {
        let pipeline = Arc::new(
            parse_pipeline(
                r#"
name: isolation
on: push
jobs:
  publish:
    permissions:
      packages: write
    steps:
      - name: use
        run: echo "token=$TOKEN"
        env:
          TOKEN: ${{ secrets.REGISTRY_TOKEN }}
  sibling:
    permissions:
      packages: write
    steps:
      - name: look
        run: echo "sibling=${TOKEN:-unset}"; env
"#,
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let run = orchestrator(&base)
            .run(Uuid::new_v4(), pipeline, push("main"), CancellationToken::new())
            .await;
        assert!(run.succeeded());

        let publish = run.result("publish").unwrap();
        assert!(messages(publish).contains(&"token=[REDACTED]"));

        let sibling = run.result("sibling").unwrap();
        assert!(messages(sibling).contains(&"sibling=unset"));

        for result in &run.results {
            assert!(result.logs().iter().all(|e| !e.message.contains(TOKEN)));
        }
    }

    #[tokio::test]
    async fn test_env_layers_and_context() {
        let pipeline = Arc::new(
            parse_pipeline(
                r#"
name: layers
on: push
env:
  LEVEL: pipeline
  IMAGE: quay.io/org/app
jobs:
  build:
    env:
      LEVEL: job
      TAG: ${{ env.KEEL_JOB }}-${{ event.branch }}
    steps:
      - name: show
        run: echo "$LEVEL $TAG $KEEL_PIPELINE $KEEL_SHA ${{ env.IMAGE }}"
      - name: overlay
        run: echo "$LEVEL"
        env:
          LEVEL: step
      - name: after
        run: echo "$LEVEL"
"#,
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let run = orchestrator(&base)
            .run(Uuid::new_v4(), pipeline, push("main"), CancellationToken::new())
            .await;

        let result = run.result("build").unwrap();
        assert!(result.succeeded());

        let show: Vec<_> = result.step_logs(0).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(show, vec!["job build-main layers abc123 quay.io/org/app"]);
        assert_eq!(result.step_logs(1)[0].message, "step");
        assert_eq!(result.step_logs(2)[0].message, "job");
    }

    #[tokio::test]
    async fn test_cancel_stops_running_step() {
        let pipeline = Arc::new(
            parse_pipeline(
                "name: p\non: push\njobs:\n  slow:\n    steps:\n      - name: wait\n        run: sleep 30\n      - name: never\n        run: 'true'\n",
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let run = orchestrator(&base)
            .run(Uuid::new_v4(), pipeline, push("main"), cancel)
            .await;

        let result = run.result("slow").unwrap();
        assert_eq!(result.status(), JobStatus::Cancelled);
        assert_eq!(result.exit_code(), EXIT_CANCELLED);
        assert_eq!(result.executed_steps(), vec!["wait"]);
        assert_eq!(result.steps()[0].outcome, StepOutcome::Cancelled);
        assert_eq!(result.steps()[0].exit_code, None);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let base = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = orchestrator(&base)
            .run(Uuid::new_v4(), ubi8("echo build", "write"), push("main"), cancel)
            .await;

        let result = run.result("ubi8-image").unwrap();
        assert_eq!(result.status(), JobStatus::Cancelled);
        assert!(result.steps().is_empty());
    }

    #[tokio::test]
    async fn test_job_timeout() {
        let pipeline = Arc::new(
            parse_pipeline(
                "name: p\non: push\njobs:\n  slow:\n    steps:\n      - name: wait\n        run: sleep 30\n  quick:\n    steps:\n      - run: 'true'\n",
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let config = RunnerConfig {
            job_timeout: Duration::from_millis(300),
            ..test_config(&base)
        };
        let run = orchestrator_with(config, ActionCatalog::default())
            .run(Uuid::new_v4(), pipeline, push("main"), CancellationToken::new())
            .await;

        let slow = run.result("slow").unwrap();
        assert_eq!(slow.status(), JobStatus::TimedOut);
        assert_eq!(slow.exit_code(), EXIT_TIMED_OUT);
        assert_eq!(slow.failure().unwrap().step.as_deref(), Some("wait"));

        assert!(run.result("quick").unwrap().succeeded());
        assert_eq!(run.exit_code(), EXIT_TIMED_OUT);
    }

    #[tokio::test]
    async fn test_timeout_while_background_program_holds_output() {
        let pipeline = Arc::new(
            parse_pipeline(
                "name: p\non: push\njobs:\n  daemon:\n    steps:\n      - name: start\n        run: sleep 600 & echo started\n      - name: never\n        run: 'true'\n",
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let config = RunnerConfig {
            job_timeout: Duration::from_millis(300),
            ..test_config(&base)
        };
        let started = std::time::Instant::now();
        let run = orchestrator_with(config, ActionCatalog::default())
            .run(Uuid::new_v4(), pipeline, push("main"), CancellationToken::new())
            .await;
        assert!(started.elapsed() < Duration::from_secs(10));

        let result = run.result("daemon").unwrap();
        assert_eq!(result.status(), JobStatus::TimedOut);
        assert_eq!(result.exit_code(), EXIT_TIMED_OUT);
        assert_eq!(result.executed_steps(), vec!["start"]);
        assert!(messages(result).contains(&"started"));
    }

    #[tokio::test]
    async fn test_multiline_secret_redacted_on_stderr() {
        let key = "-----BEGIN KEY-----\nMIIEvQIBADANBgkqhkiG\n-----END KEY-----";
        let store = SecretStore::new().with(
            "SIGNING_KEY",
            SecretDefinition::new(
                Scope::new("packages", Access::Write),
                SecretSource::Value(key.to_string()),
            ),
        );
        let pipeline = Arc::new(
            parse_pipeline(
                r#"
name: sign
on: push
jobs:
  sign:
    permissions:
      packages: write
    steps:
      - name: leak
        run: printf '%s\n' "$KEY" >&2
        env:
          KEY: ${{ secrets.SIGNING_KEY }}
"#,
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let config = test_config(&base);
        let executor = StepExecutor::new(config.shell.clone(), ActionCatalog::default());
        let run = PipelineOrchestrator::new(config, CredentialBroker::new(store), executor)
            .run(Uuid::new_v4(), pipeline, push("main"), CancellationToken::new())
            .await;

        let result = run.result("sign").unwrap();
        assert!(result.succeeded());
        let leak = result.step_logs(0);
        let lines: Vec<_> = leak.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(lines, vec!["[REDACTED]"; 3]);
        assert!(leak.iter().all(|e| e.level == keel_core::domain::log::LogLevel::Error));
    }

    #[test]
    fn test_command_text_never_expands_secret_env() {
        let pipeline = ubi8("echo build", "write");
        let names = vec!["REGISTRY_TOKEN".to_string()];
        let secrets = CredentialBroker::new(store())
            .resolve_all(&names, &pipeline.jobs[0].permissions)
            .unwrap();
        let env = EnvSnapshot::default();
        let event = push("main");

        let mut step = Step {
            id: None,
            name: "login".to_string(),
            env: BTreeMap::from([
                ("TOKEN".to_string(), "${{ secrets.REGISTRY_TOKEN }}".to_string()),
                ("USER".to_string(), "bot".to_string()),
            ]),
            kind: StepKind::Command {
                run: "docker login -u ${{ env.USER }} -p ${{ env.TOKEN }}".to_string(),
            },
        };
        assert!(matches!(
            prepare_step(&step, &env, &event, &secrets),
            Err(TemplateError::Unresolved(_))
        ));

        step.kind = StepKind::Command {
            run: "docker login -u ${{ env.USER }} -p \"$TOKEN\"".to_string(),
        };
        let (step_env, invocation) = prepare_step(&step, &env, &event, &secrets).unwrap();
        assert_eq!(step_env.get("TOKEN"), Some(TOKEN));
        match invocation {
            Invocation::Command { script } => {
                assert_eq!(script, "docker login -u bot -p \"$TOKEN\"");
            }
            Invocation::Action { .. } => panic!("expected a command"),
        }
    }

    #[tokio::test]
    async fn test_sibling_jobs_unaffected_by_failure() {
        let pipeline = Arc::new(
            parse_pipeline(
                "name: p\non: push\njobs:\n  broken:\n    steps:\n      - run: exit 2\n  fine:\n    steps:\n      - run: echo ok\n",
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let config = RunnerConfig {
            max_parallel_jobs: 1,
            ..test_config(&base)
        };
        let run = orchestrator_with(config, ActionCatalog::default())
            .run(Uuid::new_v4(), pipeline, push("main"), CancellationToken::new())
            .await;

        let jobs: Vec<_> = run.results.iter().map(|r| r.job()).collect();
        assert_eq!(jobs, vec!["broken", "fine"]);
        assert!(!run.result("broken").unwrap().succeeded());
        assert!(run.result("fine").unwrap().succeeded());
        assert_eq!(run.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_actions_receive_rendered_inputs() {
        let actions = TempDir::new().unwrap();
        std::fs::create_dir_all(actions.path().join("login")).unwrap();
        std::fs::write(
            actions.path().join("login").join("v1.lua"),
            r#"
local token = inputs.require("token")
log.info("registry " .. inputs.get("registry"))
log.info("token " .. token)
if #token < 4 then return 1 end
return 0
"#,
        )
        .unwrap();

        let pipeline = Arc::new(
            parse_pipeline(
                r#"
name: p
on: push
env:
  REGISTRY: quay.io
jobs:
  publish:
    permissions:
      packages: write
    steps:
      - name: login
        uses: login@v1
        with:
          registry: ${{ env.REGISTRY }}
          token: ${{ secrets.REGISTRY_TOKEN }}
      - name: missing
        uses: nope@v1
"#,
            )
            .unwrap(),
        );

        let base = TempDir::new().unwrap();
        let run = orchestrator_with(
            test_config(&base),
            ActionCatalog::new(Some(actions.path().to_path_buf())),
        )
        .run(Uuid::new_v4(), pipeline, push("main"), CancellationToken::new())
        .await;

        let result = run.result("publish").unwrap();
        let login: Vec<_> = result.step_logs(0).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(login, vec!["registry quay.io", "token [REDACTED]"]);

        assert_eq!(result.executed_steps(), vec!["login", "missing"]);
        assert_eq!(
            result.exit_code(),
            keel_core::domain::run::EXIT_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_workspace_removed_after_job() {
        let base = TempDir::new().unwrap();
        let run = orchestrator(&base)
            .run(
                Uuid::new_v4(),
                ubi8("echo build", "write"),
                push("main"),
                CancellationToken::new(),
            )
            .await;

        assert!(run.succeeded());
        assert!(!base.path().join(run.id.to_string()).exists());
    }

    #[test]
    fn test_secret_source_vars_not_inherited() {
        // SAFETY: the variable name is unique to this test
        unsafe { std::env::set_var("KEEL_TEST_QUAY_TOKEN", "from-env-1234") };
        let store = SecretStore::new().with(
            "REGISTRY_TOKEN",
            SecretDefinition::new(
                Scope::new("packages", Access::Write),
                SecretSource::Env("KEEL_TEST_QUAY_TOKEN".to_string()),
            ),
        );
        let base = TempDir::new().unwrap();
        let config = RunnerConfig {
            inherit_env: vec!["PATH".to_string(), "KEEL_TEST_QUAY_TOKEN".to_string()],
            ..test_config(&base)
        };
        let executor = StepExecutor::from_config(&config);
        let orchestrator =
            PipelineOrchestrator::new(config, CredentialBroker::new(store), executor);

        let pipeline = ubi8("echo build", "write");
        let event = push("main");
        let buffer = Arc::new(InMemoryLogBuffer::new());
        let run = JobRun {
            run_id: Uuid::new_v4(),
            pipeline: &pipeline,
            job: &pipeline.jobs[0],
            event: &event,
            buffer: Arc::clone(&buffer),
            log: JobLog::new(buffer),
            cancel: CancellationToken::new(),
            timed_out: Arc::new(AtomicBool::new(false)),
            timeout: Duration::from_secs(60),
        };

        let env = orchestrator.job_env(&run, base.path()).unwrap();
        assert!(env.contains("PATH"));
        assert!(!env.contains("KEEL_TEST_QUAY_TOKEN"));
        assert_eq!(env.get("KEEL_BRANCH"), Some("main"));
        assert_eq!(env.get("IMAGE"), Some("quay.io/org/ubi8"));
    }
}
