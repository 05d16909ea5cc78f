use normpix_core::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins when set;
/// otherwise production gets info-level, everything else debug.
pub fn init_telemetry(config: &Config) {
    let default_filter = if config.is_production() {
        "normpix=info,tower_http=info"
    } else {
        "normpix=debug,tower_http=debug,axum=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
