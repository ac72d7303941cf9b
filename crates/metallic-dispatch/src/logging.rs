use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::config::RuntimeConfig;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to the
/// configured log level.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(config: &RuntimeConfig) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init().is_ok()
}
