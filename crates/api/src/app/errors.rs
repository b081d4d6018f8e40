use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use dockjob_infra::jobs::JobError;

pub fn job_error_to_response(err: JobError) -> axum::response::Response {
    match err {
        JobError::NotFound(_) => not_found(),
        JobError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, msg),
        JobError::ShuttingDown => json_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        other => {
            tracing::error!(error = %other, "job request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// `{"status": "error", "error": message}`
pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "status": "error",
            "error": message.into(),
        })),
    )
        .into_response()
}

pub fn not_found() -> axum::response::Response {
    (StatusCode::NOT_FOUND, axum::Json(json!({ "error": "not found" }))).into_response()
}
