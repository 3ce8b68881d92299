//! Runner configuration
//!
//! Every setting has a default and can be overridden through `KEEL_*`
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Variables copied from the runner's own environment into every job
const DEFAULT_INHERITED_ENV: &[&str] = &["PATH", "HOME", "LANG", "TERM", "TMPDIR", "USER"];

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory under which per-job workspaces are created
    pub workspace_base: PathBuf,

    /// Ceiling for jobs that do not declare `timeout_minutes`
    pub job_timeout: Duration,

    /// Jobs executing at the same time, across all runs
    pub max_parallel_jobs: usize,

    /// Directory searched for Lua actions before the built-in ones
    pub actions_dir: Option<PathBuf>,

    /// YAML secret store; no secrets are available without one
    pub secrets_file: Option<PathBuf>,

    /// Shell used for `run:` steps, invoked as `<shell> -e -c <script>`
    pub shell: String,

    /// Keep job workspaces after the job finishes
    pub keep_workspace: bool,

    /// Names of runner variables passed through to steps
    pub inherit_env: Vec<String>,
}

impl RunnerConfig {
    /// Creates configuration from environment variables
    ///
    /// Recognized variables:
    /// - KEEL_WORKSPACE_BASE (default: `<tmp>/keel`)
    /// - KEEL_JOB_TIMEOUT (seconds, default: 3600)
    /// - KEEL_MAX_PARALLEL_JOBS (default: 4)
    /// - KEEL_ACTIONS_DIR
    /// - KEEL_SECRETS_FILE
    /// - KEEL_SHELL (default: sh)
    /// - KEEL_KEEP_WORKSPACE (true/false, default: false)
    /// - KEEL_INHERIT_ENV (comma separated names)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let job_timeout = match var("KEEL_JOB_TIMEOUT") {
            Some(raw) => Duration::from_secs(raw.trim().parse::<u64>().map_err(|_| {
                anyhow::anyhow!("KEEL_JOB_TIMEOUT must be a number of seconds, got '{}'", raw)
            })?),
            None => defaults.job_timeout,
        };

        let max_parallel_jobs = match var("KEEL_MAX_PARALLEL_JOBS") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                anyhow::anyhow!("KEEL_MAX_PARALLEL_JOBS must be a number, got '{}'", raw)
            })?,
            None => defaults.max_parallel_jobs,
        };

        let keep_workspace = match var("KEEL_KEEP_WORKSPACE") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                anyhow::anyhow!("KEEL_KEEP_WORKSPACE must be true or false, got '{}'", raw)
            })?,
            None => defaults.keep_workspace,
        };

        let inherit_env = var("KEEL_INHERIT_ENV")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.inherit_env);

        Ok(Self {
            workspace_base: var("KEEL_WORKSPACE_BASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_base),
            job_timeout,
            max_parallel_jobs,
            actions_dir: var("KEEL_ACTIONS_DIR").map(PathBuf::from),
            secrets_file: var("KEEL_SECRETS_FILE").map(PathBuf::from),
            shell: var("KEEL_SHELL").unwrap_or(defaults.shell),
            keep_workspace,
            inherit_env,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workspace_base.as_os_str().is_empty() {
            anyhow::bail!("workspace_base cannot be empty");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.shell.trim().is_empty() {
            anyhow::bail!("shell cannot be empty");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace_base: std::env::temp_dir().join("keel"),
            job_timeout: Duration::from_secs(3600),
            max_parallel_jobs: 4,
            actions_dir: None,
            secrets_file: None,
            shell: "sh".to_string(),
            keep_workspace: false,
            inherit_env: DEFAULT_INHERITED_ENV.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.max_parallel_jobs, 4);
        assert_eq!(config.shell, "sh");
        assert!(config.inherit_env.contains(&"PATH".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RunnerConfig::from_lookup(lookup(&[
            ("KEEL_WORKSPACE_BASE", "/var/lib/keel"),
            ("KEEL_JOB_TIMEOUT", "90"),
            ("KEEL_MAX_PARALLEL_JOBS", "8"),
            ("KEEL_ACTIONS_DIR", "/etc/keel/actions"),
            ("KEEL_SHELL", "bash"),
            ("KEEL_KEEP_WORKSPACE", "yes"),
            ("KEEL_INHERIT_ENV", "PATH, SSL_CERT_FILE,"),
        ]))
        .unwrap();

        assert_eq!(config.workspace_base, PathBuf::from("/var/lib/keel"));
        assert_eq!(config.job_timeout, Duration::from_secs(90));
        assert_eq!(config.max_parallel_jobs, 8);
        assert_eq!(config.actions_dir, Some(PathBuf::from("/etc/keel/actions")));
        assert_eq!(config.secrets_file, None);
        assert_eq!(config.shell, "bash");
        assert!(config.keep_workspace);
        assert_eq!(config.inherit_env, vec!["PATH", "SSL_CERT_FILE"]);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        assert!(RunnerConfig::from_lookup(lookup(&[("KEEL_JOB_TIMEOUT", "soon")])).is_err());
        assert!(RunnerConfig::from_lookup(lookup(&[("KEEL_KEEP_WORKSPACE", "maybe")])).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunnerConfig::default();
        assert!(config.validate().is_ok());

        config.max_parallel_jobs = 0;
        assert!(config.validate().is_err());
        config.max_parallel_jobs = 1;

        config.job_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.job_timeout = Duration::from_secs(1);

        config.shell = " ".to_string();
        assert!(config.validate().is_err());
    }
}
