//! Meridian Telemetry - logging setup for the Meridian MCP host.
//!
//! Servers managed by the host speak their protocol over standard output, so
//! the host itself must never log there. This crate only offers standard
//! error and rolling files as log targets.
//!
//! # Example
//!
//! ```rust,no_run
//! use meridian_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), meridian_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("meridian_mcp=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("host starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
