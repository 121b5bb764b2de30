//! Tracing subscriber setup with format selection.

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::{LogFormat, TracingConfig};

/// Keeps logging set up for the lifetime of the program.
pub struct TracingGuard {
    format: LogFormat,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        tracing::trace!(format = ?self.format, "Shutting down logging");
    }
}

/// Initialize tracing with the given configuration.
///
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_tracing(config: &TracingConfig) -> Result<TracingGuard> {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.detailed)
        .with_line_number(config.detailed)
        .with_thread_ids(config.detailed);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => layer
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(TracingGuard {
        format: config.format,
    })
}
