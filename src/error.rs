//! Application error type.
//!
//! Per-device read failures never surface here; they are reported as
//! [`crate::reading::ReadStatus`] values and contained within the poll
//! cycle. `MonitorError` covers the genuinely fatal or loggable conditions:
//! configuration problems, startup connection establishment, and sink
//! failures.

use thiserror::Error;

use crate::bus::BusError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, MonitorError>;

/// Top-level application error.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("sink error: {0}")]
    Sink(String),
}
