//! Core job types: lifecycle states, arguments and the job record.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dockjob_core::{DomainError, DomainResult};

pub use dockjob_core::JobId;

/// Job execution status.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`. A pending job may
/// also end directly in `Failed` (process could not be started) or
/// `Cancelled` (cancelled before a slot freed up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Recorded, waiting for an execution slot
    Pending,
    /// External process is alive
    Running,
    /// Process exited with code 0
    Completed,
    /// Nonzero exit, timeout, or the process could not be started
    Failed,
    /// Cancelled by request
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                next,
                JobStatus::Running | JobStatus::Failed | JobStatus::Cancelled
            ),
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unknown job status '{}'; expected one of pending, running, completed, failed, cancelled",
                    wanted
                ))
            })
    }
}

/// Why a job ended in `Failed` or `Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Process exited with a nonzero code
    ExitCode { code: i32 },
    /// Process was killed by a signal it did not expect
    Signal { signal: Option<i32> },
    /// The job's own clock expired
    Timeout { after_secs: u64 },
    /// Process could not be started or waited on
    Launch,
    /// Cancelled by request
    Cancelled,
    /// The hosting process restarted while the job was in flight
    Interrupted,
}

/// Named arguments for the external process.
///
/// Rendered as `--name value` pairs in key order: `null` and `false` are
/// dropped, `true` becomes a bare flag, arrays repeat the flag per element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobArgs(BTreeMap<String, serde_json::Value>);

impl JobArgs {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    /// Check names and value shapes before anything is recorded.
    pub fn validate(&self) -> DomainResult<()> {
        for (name, value) in &self.0 {
            let valid_name = !name.is_empty()
                && !name.starts_with('-')
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid_name {
                return Err(DomainError::validation(format!(
                    "invalid argument name '{}'",
                    name
                )));
            }

            let valid_value = match value {
                serde_json::Value::Object(_) => false,
                serde_json::Value::Array(items) => items
                    .iter()
                    .all(|v| !matches!(v, serde_json::Value::Object(_) | serde_json::Value::Array(_))),
                _ => true,
            };
            if !valid_value {
                return Err(DomainError::validation(format!(
                    "argument '{}' must be a scalar or a list of scalars",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Render as command-line arguments.
    pub fn to_command_line(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, value) in &self.0 {
            let flag = format!("--{}", name);
            match value {
                serde_json::Value::Null | serde_json::Value::Bool(false) => {}
                serde_json::Value::Bool(true) => out.push(flag),
                serde_json::Value::Array(items) => {
                    for item in items {
                        if let Some(rendered) = render_scalar(item) {
                            out.push(flag.clone());
                            out.push(rendered);
                        }
                    }
                }
                other => {
                    if let Some(rendered) = render_scalar(other) {
                        out.push(flag);
                        out.push(rendered);
                    }
                }
            }
        }
        out
    }
}

fn render_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl<K: Into<String>, V: Into<serde_json::Value>> FromIterator<(K, V)> for JobArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Structured payload of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    /// The job's working directory
    pub job_dir: PathBuf,
    /// First subdirectory matching the configured result prefix, if any
    pub output_dir: Option<PathBuf>,
    /// Top-level entries of `output_dir`, sorted by name
    pub artifacts: Vec<String>,
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition for job {job_id}: {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One submitted computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub job_name: Option<String>,
    /// Resolved, absolute path of the executable or script
    pub script_path: PathBuf,
    pub args: JobArgs,
    /// Working directory owned by this job
    pub job_dir: PathBuf,
    pub timeout: Duration,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub result: Option<JobOutput>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl JobRecord {
    /// Create a pending record.
    pub fn new(
        job_id: JobId,
        script_path: PathBuf,
        args: JobArgs,
        job_name: Option<String>,
        job_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            job_id,
            job_name,
            script_path,
            args,
            job_dir,
            timeout,
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            result: None,
            error: None,
            failure: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                job_id: self.job_id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Mark job as running once its process has been spawned.
    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark job as completed with its discovered output.
    pub fn mark_completed(&mut self, exit_code: i32, output: JobOutput) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.finish();
        self.exit_code = Some(exit_code);
        self.result = Some(output);
        Ok(())
    }

    /// Mark job as failed.
    pub fn mark_failed(
        &mut self,
        failure: FailureKind,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.finish();
        self.exit_code = exit_code;
        self.error = Some(message.into());
        self.failure = Some(failure);
        Ok(())
    }

    /// Mark job as cancelled.
    pub fn mark_cancelled(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Cancelled)?;
        self.finish();
        self.error = Some(message.into());
        self.failure = Some(FailureKind::Cancelled);
        Ok(())
    }

    /// Wall-clock runtime: start to finish, or start to `now` while running.
    pub fn runtime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or(now);
        Some((end - started).max(chrono::Duration::zero()))
    }
}
