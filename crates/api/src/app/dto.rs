use axum::http::StatusCode;
use serde::Deserialize;

use dockjob_core::JobId;
use dockjob_infra::jobs::{JobKind, JobStatus};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// `POST /jobs/kinds`: a tagged [`JobKind`] plus an optional name.
#[derive(Debug, Deserialize)]
pub struct SubmitKindRequest {
    #[serde(flatten)]
    pub kind: JobKind,
    #[serde(default)]
    pub job_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub tail: Option<usize>,
}

pub const DEFAULT_LOG_TAIL: usize = 50;

// -------------------------
// Parsing helpers
// -------------------------

/// Unparseable ids are unknown ids.
pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>().map_err(|_| errors::not_found())
}

pub fn parse_status_filter(
    raw: Option<&str>,
) -> Result<Option<JobStatus>, axum::response::Response> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<JobStatus>()
            .map(Some)
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, e.to_string())),
    }
}
