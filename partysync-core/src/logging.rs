//! Tracing setup for the sync server.
//!
//! One global subscriber for the whole process. `RUST_LOG` wins when set;
//! otherwise the configured level becomes the default directive. Room,
//! gateway, and health events all log through this.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber: JSON output for log shippers, pretty
/// output for a terminal, appended to a file when one is configured.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = default_level(&config.level)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);

    let log_file = match &config.file_path {
        Some(path) => Some(std::sync::Arc::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        )),
        None => None,
    };

    match (config.format.as_str(), log_file) {
        ("json", Some(file)) => registry
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init(),
        ("json", None) => registry
            .with(fmt::layer().json().with_target(true))
            .init(),
        // ANSI escapes would garble a log file.
        (_, Some(file)) => registry
            .with(fmt::layer().with_ansi(false).with_writer(file))
            .init(),
        (_, None) => registry.with(fmt::layer().pretty()).init(),
    }

    Ok(())
}

/// Validate the configured level up front so a typo in `logging.level`
/// fails startup instead of silently logging nothing.
fn default_level(level: &str) -> anyhow::Result<Level> {
    level
        .parse::<Level>()
        .map_err(|_| anyhow::anyhow!("unrecognized logging.level {level:?}"))
}
