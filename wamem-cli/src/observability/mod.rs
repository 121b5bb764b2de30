//! Logging setup for the `wamem` binary.
//!
//! ```ignore
//! let _guard = init_tracing(&TracingConfig::from_verbosity(2))?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig};
pub use tracing_setup::init_tracing;
