//! Structured logging bootstrap.
//!
//! Initializes `tracing-subscriber` from a [`LoggingConfig`]. `RUST_LOG`
//! takes precedence over the configured level so operators can raise
//! verbosity per module without touching the config file.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber,
/// later calls are no-ops (useful in tests that share a process).
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // an already-installed subscriber is fine
    let _ = result;
}
