//! Host logging backend.
//!
//! Library code logs through the `log` facade.  The binary installs a
//! `tracing-subscriber` fmt subscriber whose `tracing-log` bridge captures
//! those records.  `RUST_LOG` wins over the command-line level when set.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Severity threshold selectable from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Everything, including per-event dispatch.
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Filter for the given flags: `--quiet` forces `error`, otherwise
/// `RUST_LOG` if present, otherwise `level`.
pub fn filter(level: LogLevel, quiet: bool) -> EnvFilter {
    if quiet {
        return EnvFilter::new(LogLevel::Error.as_filter());
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// Install the global subscriber.  Fails if one is already installed.
pub fn init(level: LogLevel, quiet: bool) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level, quiet))
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}
