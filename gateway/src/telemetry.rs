//! Logging initialisation for the gateway
//!
//! tracing-subscriber with an env filter; pretty output by default, JSON
//! when `GHOSTBRIDGE_LOG_FORMAT=json`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialise the global tracing subscriber. Call once at startup; a second
/// call is a no-op error and is ignored (tests initialise their own).
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("GHOSTBRIDGE_LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let result = if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already initialised");
    }
}
