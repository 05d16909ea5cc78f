use std::sync::Arc;

use anyhow::Result;
use axum::Router;

use crate::state::AppState;

/// Bind the listener and serve until a shutdown signal arrives. The image
/// engine is shut down only after the graceful drain completes, so no
/// in-flight request loses its engine mid-conversion.
pub async fn start_server(state: Arc<AppState>, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        environment = %state.config.environment,
        max_upload_mb = state.config.max_upload_size_bytes / 1024 / 1024,
        jpeg_quality = state.config.jpeg_quality,
        normalize_extensions = %state.config.normalize_extensions.join(","),
        storage_backend = %state.config.storage_backend,
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine.shutdown().await;
    tracing::info!("Image engine shutdown complete");

    Ok(())
}

/// Resolves when the process receives SIGINT, SIGTERM or SIGQUIT.
///
/// # Panics
///
/// Panics if a signal handler cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(unix)]
    let quit = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::quit())
            .expect("Failed to install SIGQUIT handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = quit => tracing::info!("Received SIGQUIT"),
    }

    tracing::info!("Shutting down gracefully");
}
