//! Structured logging for the transport.
//!
//! `start` writes JSON lines to a daily-rotated file under the config
//! directory plus human-readable lines on stderr; stdout belongs to the bus.
//! One-shot subcommands log to stderr only. `RUST_LOG` overrides the
//! configured level.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Log file names are `vxwhatsapp.YYYY-MM-DD.jsonl`.
const LOG_FILE_PREFIX: &str = "vxwhatsapp";
const LOG_FILE_SUFFIX: &str = "jsonl";

/// Dependencies whose per-request chatter would drown the long-poll loop.
const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "hyper_util", "reqwest"];

/// Keeps the file writer flushing; drop it last.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Filter directives for `level`, with noisy dependencies held at `warn`.
pub fn filter_directives(level: &str) -> String {
    let mut directives = level.to_owned();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}=warn"));
    }
    directives
}

fn env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::try_from_default_env().context("invalid RUST_LOG");
    }
    EnvFilter::try_new(filter_directives(level))
        .with_context(|| format!("invalid log level {level:?}"))
}

/// Initialise logging for the `start` subcommand.
///
/// # Errors
///
/// Returns an error if the logs directory or appender cannot be created, the
/// filter does not parse, or a global subscriber is already installed.
pub fn init_production(logs_dir: &Path, config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(config.max_files)
        .build(logs_dir)
        .context("failed to open log file")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(non_blocking);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter(&config.level)?)
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Stderr-only logging for one-shot subcommands. A no-op if already installed.
pub fn init_cli() {
    let filter = env_filter("info").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
