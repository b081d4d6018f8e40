//! Job endpoints: submit, inspect, tail, cancel and list.

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use dockjob_infra::jobs::{DockingBatch, JobManager, JobRequest};

use crate::app::dto::{self, ListQuery, LogQuery, SubmitKindRequest};
use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(submit).get(list))
        .route("/jobs/kinds", post(submit_kind))
        .route("/jobs/batch/docking", post(submit_batch_docking))
        .route("/jobs/:job_id", get(get_status))
        .route("/jobs/:job_id/result", get(get_result))
        .route("/jobs/:job_id/log", get(get_log))
        .route("/jobs/:job_id/cancel", post(cancel))
}

/// POST /jobs
pub async fn submit(
    Extension(manager): Extension<JobManager>,
    Json(request): Json<JobRequest>,
) -> axum::response::Response {
    match manager.submit_request(request) {
        Ok(submission) => (StatusCode::ACCEPTED, Json(submission)).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// POST /jobs/kinds
pub async fn submit_kind(
    Extension(manager): Extension<JobManager>,
    Json(request): Json<SubmitKindRequest>,
) -> axum::response::Response {
    match manager.submit_kind(request.kind, request.job_name) {
        Ok(submission) => (StatusCode::ACCEPTED, Json(submission)).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// POST /jobs/batch/docking
///
/// Individual peptide failures are part of a successful response.
pub async fn submit_batch_docking(
    Extension(manager): Extension<JobManager>,
    Json(batch): Json<DockingBatch>,
) -> axum::response::Response {
    match manager.submit_batch_docking(batch) {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// GET /jobs?status=running
pub async fn list(
    Extension(manager): Extension<JobManager>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let filter = match dto::parse_status_filter(query.status.as_deref()) {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };
    Json(manager.list(filter)).into_response()
}

/// GET /jobs/:job_id
pub async fn get_status(
    Extension(manager): Extension<JobManager>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match manager.get_status(job_id) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// GET /jobs/:job_id/result
pub async fn get_result(
    Extension(manager): Extension<JobManager>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match manager.get_result(job_id) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// GET /jobs/:job_id/log?tail=50 (`tail=0` returns the whole log)
pub async fn get_log(
    Extension(manager): Extension<JobManager>,
    Path(job_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let tail = query.tail.unwrap_or(dto::DEFAULT_LOG_TAIL);
    match manager.get_log(job_id, tail) {
        Ok(log) => Json(log).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// POST /jobs/:job_id/cancel
pub async fn cancel(
    Extension(manager): Extension<JobManager>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match manager.cancel(job_id) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}
