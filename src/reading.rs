//! Normalized instrument readings.

/// Outcome of one polled field.
///
/// `OverRange` and `LowVac` are valid device-reported states, not transport
/// faults; `IoFault` marks a transport-level disconnect that triggers
/// connection recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadStatus {
    /// A valid measurement was decoded.
    Ok,
    /// No matching line arrived within the read deadline.
    Timeout,
    /// A line arrived but its prefix or length did not match.
    BadPacket,
    /// The payload was not numeric.
    BadData,
    /// Gauge above its measuring range.
    OverRange,
    /// Gauge below its measuring range.
    LowVac,
    /// Transport-level disconnect; the connection needs recovery.
    IoFault,
    /// Catch-all decode or transport failure.
    Error(String),
}

/// One normalized measurement produced by a device poll.
///
/// Invariant: `value` is `Some` exactly when `status` is [`ReadStatus::Ok`].
/// The constructors enforce this; build readings through them.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Configured device name, used as a sink tag.
    pub device: String,
    /// Field name, e.g. `pressure` or `frequency`.
    pub field: String,
    /// Measured value, present only on a successful decode.
    pub value: Option<f64>,
    /// Physical unit, e.g. `mbar` or `Hz`.
    pub unit: String,
    /// Outcome of the poll.
    pub status: ReadStatus,
}

impl Reading {
    /// A successful measurement.
    pub fn ok(device: &str, field: &str, unit: &str, value: f64) -> Self {
        Self {
            device: device.to_string(),
            field: field.to_string(),
            value: Some(value),
            unit: unit.to_string(),
            status: ReadStatus::Ok,
        }
    }

    /// A reading that carries only a status, never a value.
    pub fn without_value(device: &str, field: &str, unit: &str, status: ReadStatus) -> Self {
        debug_assert!(status != ReadStatus::Ok, "Ok readings must carry a value");
        Self {
            device: device.to_string(),
            field: field.to_string(),
            value: None,
            unit: unit.to_string(),
            status,
        }
    }
}
