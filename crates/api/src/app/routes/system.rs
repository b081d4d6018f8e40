use axum::{Json, extract::Extension, response::IntoResponse};

use dockjob_infra::jobs::JobManager;

/// Liveness plus per-status job counts.
pub async fn health(Extension(manager): Extension<JobManager>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "jobs": manager.stats(),
    }))
}
