//! Helper functions for logging

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static LOGGING_INITIALIZED: Once = Once::new();

/// Installs the global subscriber once. `RUST_LOG` selects what is logged
/// (`info` when unset) and `RUST_LOG_FORMAT=json` switches to JSON lines.
/// Logs go to stderr, leaving stdout to command output.
pub fn setup_logging() {
    LOGGING_INITIALIZED.call_once(|| {
        let filter =
            || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        if std::env::var("RUST_LOG_FORMAT") == Ok("json".to_string()) {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .json()
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
        }
    });
}
