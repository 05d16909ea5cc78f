pub mod routes;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;

use normpix_core::Config;
use normpix_processing::{
    EngineSettings, FormatPolicy, ImageEngine, JpegConverter, UploadIntake,
};
use normpix_storage::create_storage;

use crate::state::AppState;

/// Build the application: validate configuration, start the image engine,
/// select a storage backend, and assemble the router. An engine startup
/// failure aborts here; the listener never binds with a dead engine behind
/// it.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, Router)> {
    config.validate().context("Configuration validation failed")?;

    let engine = Arc::new(ImageEngine::new());
    engine
        .initialize(EngineSettings {
            concurrency: config.engine_concurrency,
            max_cache_memory_bytes: config.engine_max_cache_memory_bytes,
            max_cache_entries: config.engine_max_cache_entries,
            drain_timeout: Duration::from_secs(config.engine_drain_timeout_secs),
        })
        .context("Image engine startup failed")?;

    let storage = create_storage(&config)
        .await
        .context("Storage backend initialization failed")?;
    tracing::info!(backend = %storage.backend_type(), "Storage backend ready");

    let intake = Arc::new(UploadIntake::new(
        Arc::clone(&engine),
        FormatPolicy::new(config.normalize_extensions.clone()),
        JpegConverter::new(config.jpeg_quality),
        Arc::clone(&storage),
        config.max_upload_size_bytes,
    ));

    let state = Arc::new(AppState {
        config,
        engine,
        intake,
        storage,
    });
    let router = routes::build_router(Arc::clone(&state));

    Ok((state, router))
}
