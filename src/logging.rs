//! Logging setup for the worker and the one-shot subcommands.
//!
//! The worker ships JSON lines to a daily-rotated file for ingestion and
//! compact human output to stderr; one-shot subcommands get stderr only.
//! Handlers log structured fields (`tenant`, `lead`, `event`), so the
//! file layer stays machine-parseable without message conventions.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Baseline filter when `RUST_LOG` is unset: the pipeline at `info`,
/// sqlx statement chatter suppressed.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// How the process wants its logs.
pub enum LogMode {
    /// Long-running worker: JSON file with daily rotation plus stderr.
    Worker {
        /// Directory receiving the rotated `cadence.log.*` files.
        logs_dir: PathBuf,
    },
    /// One-shot subcommand: stderr only.
    Cli,
}

/// Keeps the worker's non-blocking file writer alive; dropping it
/// flushes pending entries and closes the file. CLI mode carries no
/// guard.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber for the given mode.
///
/// # Errors
///
/// Returns an error when the worker log directory cannot be created.
pub fn init(mode: &LogMode) -> anyhow::Result<LoggingGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match mode {
        LogMode::Worker { logs_dir } => {
            std::fs::create_dir_all(logs_dir).map_err(|e| {
                anyhow::anyhow!(
                    "failed to create logs directory {}: {e}",
                    logs_dir.display()
                )
            })?;
            let appender = tracing_appender::rolling::daily(logs_dir, "cadence.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(file_writer),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .init();
            Ok(LoggingGuard { _file: Some(guard) })
        }
        LogMode::Cli => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            Ok(LoggingGuard { _file: None })
        }
    }
}
