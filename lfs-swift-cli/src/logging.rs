//! Diagnostic log setup.
//!
//! Logging is off unless `--logfile` is given: without a subscriber every
//! `tracing` macro is a no-op. stdout belongs to the protocol and is never
//! used for logs.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;

/// Log verbosity, named the way git-lfs users configure it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub(crate) enum LogLevel {
    /// Every control message.
    #[value(name = "DEBUG")]
    Debug,
    /// Lifecycle notices.
    #[value(name = "INFO")]
    Info,
    /// Failed objects.
    #[default]
    #[value(name = "WARNING")]
    Warning,
    /// Fatal errors.
    #[value(name = "ERROR")]
    Error,
    /// Same as `ERROR`.
    #[value(name = "CRITICAL")]
    Critical,
}

impl LogLevel {
    /// Maximum `tracing` level to record.
    pub(crate) const fn filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warning => LevelFilter::WARN,
            Self::Error | Self::Critical => LevelFilter::ERROR,
        }
    }
}

/// Installs a file subscriber when `logfile` is set.
pub(crate) fn init(logfile: Option<&Path>, level: LogLevel) -> Result<()> {
    let Some(path) = logfile else {
        return Ok(());
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_max_level(level.filter())
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot install logger: {e}"))
}
