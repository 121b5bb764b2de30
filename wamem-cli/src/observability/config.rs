//! Logging settings derived from the command line and the environment.

use std::io::IsTerminal;
use std::str::FromStr;

/// Overrides the output format (`json`, `pretty` or `compact`).
const LOG_FORMAT_ENV: &str = "WAMEM_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable multi-line format with colors.
    Pretty,
    /// Compact single-line format.
    Compact,
}

impl LogFormat {
    /// Pretty on a terminal, compact when stderr is redirected.
    fn detect() -> Self {
        if std::io::stderr().is_terminal() {
            Self::Pretty
        } else {
            Self::Compact
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Resolved subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directives (e.g., "info", "warn,wamem_core=trace").
    pub filter: String,
    /// Source locations and thread ids on every event.
    pub detailed: bool,
}

impl TracingConfig {
    /// Settings for `verbosity` (the `-v` count). `RUST_LOG` replaces the
    /// filter and `WAMEM_LOG_FORMAT` the format.
    pub fn from_verbosity(verbosity: u8) -> Self {
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(LogFormat::detect);
        Self::resolve(verbosity, format, std::env::var("RUST_LOG").ok())
    }

    fn resolve(verbosity: u8, format: LogFormat, rust_log: Option<String>) -> Self {
        let level = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Self {
            format,
            filter: rust_log.unwrap_or_else(|| level.to_string()),
            detailed: verbosity >= 3,
        }
    }
}
