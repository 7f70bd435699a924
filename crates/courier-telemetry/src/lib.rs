//! # Courier Telemetry
//!
//! Structured logging for processes hosting a Courier pipeline.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("Failed to init logging");
//!
//!     // Pipeline code here; `tracing` events are now emitted.
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `COURIER_SERVICE_NAME` | `courier` | Service name attached to startup log |
//! | `COURIER_LOG_LEVEL` | `info` | Log level filter; wins over `RUST_LOG`, which is read only when this is unset |
//! | `COURIER_JSON_LOGS` | `false` | Emit JSON lines instead of pretty output |
//! | `COURIER_CONSOLE_OUTPUT` | `true` | Write log lines to stdout |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
