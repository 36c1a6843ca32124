//! Tracing subscriber setup for embedding clients.
//!
//! The core only emits `tracing` events; installing a subscriber is the
//! embedder's choice. This helper wires one up with a filter that defaults
//! to this crate at info level.

use crate::Error;
use std::str::FromStr;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter applied when neither `RUST_LOG` nor explicit directives are given.
const DEFAULT_DIRECTIVES: &str = "ppptun=info";

/// Subscriber output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, one event per line with full metadata
    #[default]
    Pretty,
    /// Terse single-line output
    Compact,
    /// Newline-delimited JSON for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config(format!("unknown log format {:?}", other))),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `directives` is used, falling back to
/// [`DEFAULT_DIRECTIVES`]. Safe to call more than once (later calls are
/// no-ops).
pub fn init_logging(directives: Option<&str>, format: LogFormat) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(directives.unwrap_or(DEFAULT_DIRECTIVES)),
    };

    let layer: Box<dyn Layer<_> + Send + Sync> = match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(filter).with(layer),
    );
}
