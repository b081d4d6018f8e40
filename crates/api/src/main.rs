use std::time::Duration;

use anyhow::Context;

use dockjob_infra::jobs::{JobManager, JobsConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dockjob_observability::init();

    let config = JobsConfig::from_env().context("invalid job configuration")?;
    let manager = JobManager::new(config).context("failed to start job manager")?;

    let bind = std::env::var("DOCKJOB_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    let app = dockjob_api::app::build_app(manager.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // No external process may outlive the server.
    manager.shutdown();
    let limit = manager.config().cancel_grace + Duration::from_secs(5);
    if !manager.wait_until_idle(limit).await {
        tracing::warn!(?limit, "jobs still running at exit");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
