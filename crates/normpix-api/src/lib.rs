//! HTTP surface for the normalization pipeline: a multipart upload endpoint,
//! a health probe, and an OpenAPI document, wired to a process-wide image
//! engine that is initialized before the listener binds and shut down after
//! the last connection drains.

pub mod api_doc;
pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;

use anyhow::Result;
use normpix_core::Config;

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;
    telemetry::init_telemetry(&config);

    let (state, app) = setup::initialize_app(config).await?;
    setup::server::start_server(state, app).await
}
