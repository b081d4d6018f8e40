//! HTTP API application wiring (Axum router over a shared job manager).
//!
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and path/query parsing helpers
//! - `errors.rs`: consistent error responses

use axum::{Extension, Router, routing::get};

use dockjob_infra::jobs::JobManager;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(manager: JobManager) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(manager))
}
