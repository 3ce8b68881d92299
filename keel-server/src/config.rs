//! Server configuration

use keel_runner::RunnerConfig;
use std::path::PathBuf;

/// Finished runs kept in memory before the oldest are dropped
pub const DEFAULT_MAX_RETAINED_RUNS: usize = 500;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// Directory of pipeline definitions (`*.yml`, `*.yaml`)
    pub pipeline_dir: PathBuf,

    /// Finished runs kept for `GET /runs`; running runs are always kept
    pub max_retained_runs: usize,

    pub runner: RunnerConfig,
}

impl ServerConfig {
    /// Reads `KEEL_BIND_ADDR` (default `0.0.0.0:8080`),
    /// `KEEL_PIPELINE_DIR` (default `.keel/pipelines`) and
    /// `KEEL_MAX_RETAINED_RUNS` (default 500) on top of the runner settings
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let max_retained_runs = match var("KEEL_MAX_RETAINED_RUNS") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                anyhow::anyhow!("KEEL_MAX_RETAINED_RUNS must be a number, got '{}'", raw)
            })?,
            None => DEFAULT_MAX_RETAINED_RUNS,
        };
        if max_retained_runs == 0 {
            anyhow::bail!("KEEL_MAX_RETAINED_RUNS must be greater than 0");
        }

        Ok(Self {
            bind_addr: var("KEEL_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            pipeline_dir: var("KEEL_PIPELINE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".keel/pipelines")),
            max_retained_runs,
            runner: RunnerConfig::from_lookup(&lookup)?,
        })
    }
}
