//! # Observability
//!
//! Subscriber setup for the `tracing` events the engine emits.
//!
//! Library code only emits events. Embedding applications call
//! [`init_logging`] once at startup (or install their own subscriber).
//!
//! ```ignore
//! use rowguard::observability::{init_logging, LogFormat};
//!
//! init_logging(LogFormat::Json)?;
//! ```
//!
//! Verbosity follows `RUST_LOG`, defaulting to `rowguard=info`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use crate::errors::{AccessError, AccessResult};

/// Directive used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "rowguard=info";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for terminals
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(AccessError::InvalidConfig(format!(
                "unknown log format \"{}\"",
                other
            ))),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global `tracing` subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(format: LogFormat) -> AccessResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };

    installed.map_err(|e| AccessError::InvalidConfig(format!("logging already initialized: {}", e)))
}
