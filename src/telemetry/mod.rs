//! Telemetry module for logging.

mod logging;

pub use logging::{init_logging, LogFormat};
