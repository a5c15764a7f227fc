//! Tracing setup for the gateway binaries
//!
//! The console shows the operator's chosen level for the workspace crates
//! and only warnings from dependencies. A second layer keeps a full trace of
//! the last run on disk, so an acquisition that went wrong can be replayed
//! from the log without restarting at a noisier level.

use std::fs::{File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the full-trace log.
pub const LOG_FILE_NAME: &str = "sluice-last-run.log";

const DEFAULT_LOGS_DIR: &str = "logs";

const WORKSPACE_TARGETS: &[&str] = &["sluice_core", "sluice_web", "sluice", "tower_http"];

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the console directives when set. The trace file
/// lives at `{logs_dir}/sluice-last-run.log` (`./logs` by default) and is
/// truncated on every run.
///
/// # Errors
/// - `Box<dyn std::error::Error>` - Logs directory or log file cannot be created
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (log_file, log_file_path) = open_log_file(logs_dir)?;

    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(console_directives(console_level)))?;
    let console_layer = fmt::layer()
        .with_target(true)
        .without_time()
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::try_new(file_directives())?);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging at {} to console, full trace in {}",
        console_level,
        log_file_path.display()
    );
    Ok(())
}

/// Creates the logs directory and truncates the trace file.
fn open_log_file(logs_dir: Option<&Path>) -> io::Result<(File, PathBuf)> {
    let dir = logs_dir.unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR));
    create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    let file = File::create(&path)?;
    Ok((file, path))
}

/// Workspace crates at `level`, everything else at warn.
fn console_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(WORKSPACE_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Workspace crates at trace; dependencies stop at debug, the HTTP stack is
/// unreadable below that.
fn file_directives() -> String {
    std::iter::once("debug".to_string())
        .chain(WORKSPACE_TARGETS.iter().map(|target| format!("{target}=trace")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Console log level selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    /// Per-request and per-chunk detail
    Trace,
}

impl CliLogLevel {
    /// ```
    /// use sluice_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Warn.as_tracing_level(), tracing::Level::WARN);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true).map_err(|_| format!("Invalid log level: {s}"))
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => Ok(()),
        }
    }
}
