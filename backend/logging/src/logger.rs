//! Structured logger setup.
//!
//! Console output is always on; when a log directory is configured, a
//! daily-rolling NDJSON file sink is layered on top so cycle telemetry
//! survives restarts. Level control comes from `RUST_LOG` when set,
//! otherwise from the configured default.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init_logger(log_dir: Option<&Path>, level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_ansi(true);

    let file_layer = log_dir.map(|dir| {
        // `logs/tally.log.YYYY-MM-DD`, one JSON object per line.
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, "tally.log");
        fmt::layer().json().with_writer(appender).with_ansi(false)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
