//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::LogConfig;

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. Returns false when a
/// global subscriber was already installed.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}
