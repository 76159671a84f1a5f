//! Structured logging setup for Veritas.
//!
//! Libraries in this workspace only emit `tracing` events; the host
//! application picks a subscriber once at startup with one of these helpers.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Build the level filter. `RUST_LOG` wins over the configured default.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the logging system with human-readable output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use veritas_core::logging;
///
/// logging::init();
/// tracing::info!("SDK started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output, for log aggregation.
///
/// # Example
/// ```no_run
/// use veritas_core::logging;
///
/// logging::init_json();
/// tracing::info!(component = "identity", "SDK started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize from a [`LoggingConfig`].
///
/// Unlike [`init`] this tolerates an already-installed global subscriber,
/// which makes it safe to call from test harnesses.
pub fn init_from_config(config: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(&config.level));
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if result.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}
