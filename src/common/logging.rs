//! Logging and tracing configuration
//!
//! The monitor logs to stderr. The interactive debugger owns the terminal for
//! its console, so it writes full logs to a file and only warnings to stderr.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, writer::MakeWriterExt},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::paths;

/// Name of the log file inside the log directory
const LOG_FILE: &str = "debugger.log";

/// Initialize tracing for stderr-only logging
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rwb=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for the interactive debugger (file + stderr logging)
///
/// Returns the log file path and the appender guard; the guard must live as
/// long as the process so buffered lines get flushed.
pub fn init_console() -> Option<(PathBuf, WorkerGuard)> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rwb=debug,info"));

    if let Some(log_dir) = paths::log_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr.with_max_level(tracing::Level::WARN))
                .with_target(false)
                .compact();

            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(stderr_layer)
                .init();

            return Some((log_dir.join(LOG_FILE), guard));
        }
    }

    // Fallback: stderr only
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();

    None
}
