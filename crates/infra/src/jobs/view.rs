//! Read-only shapes handed to callers of the job manager.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{FailureKind, JobId, JobOutput, JobRecord, JobStatus};

fn runtime_secs(record: &JobRecord, now: DateTime<Utc>) -> Option<f64> {
    record
        .runtime(now)
        .map(|d| d.num_milliseconds() as f64 / 1000.0)
}

/// Point-in-time status of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Seconds since start (or start to finish)
    #[serde(rename = "runtime", skip_serializing_if = "Option::is_none")]
    pub runtime_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl JobSnapshot {
    pub fn from_record(record: &JobRecord, now: DateTime<Utc>) -> Self {
        Self {
            job_id: record.job_id,
            job_name: record.job_name.clone(),
            status: record.status,
            submitted_at: record.submitted_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            runtime_secs: runtime_secs(record, now),
            exit_code: record.exit_code,
            error: record.error.clone(),
            failure: record.failure.clone(),
        }
    }
}

/// One row of a job listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub job_name: Option<String>,
    pub script_path: PathBuf,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(rename = "runtime", skip_serializing_if = "Option::is_none")]
    pub runtime_secs: Option<f64>,
}

impl JobSummary {
    pub fn from_record(record: &JobRecord, now: DateTime<Utc>) -> Self {
        Self {
            job_id: record.job_id,
            status: record.status,
            job_name: record.job_name.clone(),
            script_path: record.script_path.clone(),
            submitted_at: record.submitted_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            runtime_secs: runtime_secs(record, now),
        }
    }
}

/// Jobs in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobList {
    pub jobs: Vec<JobSummary>,
    pub total_jobs: usize,
}

/// Tail of a job's captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogTail {
    pub lines: Vec<String>,
    pub total_line_count: usize,
}

/// Answer to a result lookup.
///
/// `Unavailable` carries the current status so callers can tell
/// "not ready yet" (pending/running) from "never will be" (failed/cancelled).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResultView {
    Ready {
        job_id: JobId,
        status: JobStatus,
        result: JobOutput,
    },
    Unavailable {
        job_id: JobId,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        message: String,
    },
}

impl JobResultView {
    pub fn from_record(record: &JobRecord) -> Self {
        match (&record.status, &record.result) {
            (JobStatus::Completed, Some(result)) => JobResultView::Ready {
                job_id: record.job_id,
                status: record.status,
                result: result.clone(),
            },
            (status, _) => {
                let message = if status.is_terminal() {
                    format!("job {}; no result will be produced", status)
                } else {
                    format!("job is {}; result not ready yet", status)
                };
                JobResultView::Unavailable {
                    job_id: record.job_id,
                    status: *status,
                    error: record.error.clone(),
                    message,
                }
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobResultView::Ready { status, .. } | JobResultView::Unavailable { status, .. } => {
                *status
            }
        }
    }
}

/// Receipt for an accepted submission; serializes with `"status": "submitted"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename = "submitted")]
pub struct Submission {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    pub message: String,
}

/// Answer to a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Termination requested; poll the status to observe the final state.
    Cancelled { job_id: JobId, message: String },
    /// The job had already finished; nothing changed.
    Noop { job_id: JobId, message: String },
}
