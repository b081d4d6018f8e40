//! Job manager configuration.

use std::path::PathBuf;
use std::time::Duration;

use super::persistence::RegistryPersistence;

/// Job manager configuration.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Root directory; each job gets `<jobs_root>/<job_id>/`
    pub jobs_root: PathBuf,
    /// Where the typed job kinds find their scripts
    pub scripts_dir: PathBuf,
    /// When set, jobs run as `<interpreter> <script> <args>`
    pub interpreter: Option<PathBuf>,
    /// Maximum concurrently running processes
    pub max_concurrent: usize,
    /// Timeout applied when a submission does not carry its own
    pub default_timeout: Duration,
    /// Time between SIGTERM and SIGKILL on cancellation
    pub cancel_grace: Duration,
    /// Name prefix of the result directory inside the job directory
    pub result_dir_prefix: String,
    /// Stderr lines kept for the failure message
    pub error_tail_lines: usize,
    /// Whether the registry is snapshotted to disk
    pub persistence: RegistryPersistence,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            jobs_root: PathBuf::from("jobs"),
            scripts_dir: PathBuf::from("scripts"),
            interpreter: None,
            max_concurrent: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            default_timeout: Duration::from_secs(6 * 60 * 60),
            cancel_grace: Duration::from_secs(10),
            result_dir_prefix: "run".to_string(),
            error_tail_lines: 20,
            persistence: RegistryPersistence::InMemory,
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl JobsConfig {
    pub fn with_jobs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.jobs_root = root.into();
        self
    }

    pub fn with_scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = dir.into();
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_result_dir_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.result_dir_prefix = prefix.into();
        self
    }

    pub fn with_persistence(mut self, persistence: RegistryPersistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// Read `DOCKJOB_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(v) = get("DOCKJOB_JOBS_ROOT") {
            config.jobs_root = PathBuf::from(v);
        }
        if let Some(v) = get("DOCKJOB_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOCKJOB_INTERPRETER") {
            config.interpreter = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DOCKJOB_MAX_CONCURRENT") {
            config.max_concurrent = parse_number("DOCKJOB_MAX_CONCURRENT", &v)? as usize;
        }
        if let Some(v) = get("DOCKJOB_TIMEOUT_SECS") {
            config.default_timeout = Duration::from_secs(parse_number("DOCKJOB_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("DOCKJOB_CANCEL_GRACE_SECS") {
            config.cancel_grace =
                Duration::from_secs(parse_number("DOCKJOB_CANCEL_GRACE_SECS", &v)?);
        }
        if let Some(v) = get("DOCKJOB_RESULT_PREFIX") {
            config.result_dir_prefix = v;
        }
        if let Some(v) = get("DOCKJOB_PERSISTENCE") {
            config.persistence = v.parse().map_err(|reason: String| ConfigError::InvalidVar {
                var: "DOCKJOB_PERSISTENCE",
                value: v.clone(),
                reason,
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runner cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "default_timeout must be positive".to_string(),
            ));
        }
        if self.result_dir_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "result_dir_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|e| ConfigError::InvalidVar {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
