//! Device drivers.
//!
//! Every instrument family is a variant of the closed [`DeviceKind`] enum
//! with its own submodule; [`Device::read_data`] is the single exhaustive
//! dispatch point. Adding an instrument family means adding a variant and a
//! submodule, never touching the poll loop.
//!
//! Drivers never return errors: every outcome of a poll, including transport
//! faults, is reported as the status of a [`Reading`].

pub mod current_meter;
pub mod gauge;
pub mod turbo;

use log::warn;
use std::sync::Arc;

use crate::bus::{BusError, Connection};
use crate::config::TimingSettings;
use crate::reading::{ReadStatus, Reading};

/// Instrument family with per-variant addressing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Pfeiffer vacuum gauge at an RS-485 bus address.
    PressureGauge {
        /// Bus address, 0..=999.
        address: u16,
    },
    /// Pfeiffer turbo-molecular pump at an RS-485 bus address.
    TurboPump {
        /// Bus address, 0..=999.
        address: u16,
    },
    /// Keithley-style current meter, alone on its port.
    CurrentMeter,
}

/// One logical instrument bound to a shared bus connection.
///
/// The connection is a shared reference; the registry owns the physical
/// handle. Identity (name, kind) never changes after construction — only
/// the connection reference is swapped by recovery.
#[derive(Debug)]
pub struct Device {
    /// Configured device name.
    pub name: String,
    /// Instrument family and addressing.
    pub kind: DeviceKind,
    /// Currently bound bus connection.
    pub connection: Arc<Connection>,
}

impl Device {
    /// Bind a device to a connection.
    pub fn new(name: String, kind: DeviceKind, connection: Arc<Connection>) -> Self {
        Self {
            name,
            kind,
            connection,
        }
    }

    /// One-time power-up sequence, run before the first poll cycle.
    ///
    /// Only the current meter needs one; a failure is degraded operation,
    /// not a startup error.
    pub async fn initialize(&self) {
        if self.kind == DeviceKind::CurrentMeter {
            if let Err(e) = current_meter::initialize(self).await {
                warn!("Could not initialize current meter '{}': {}", self.name, e);
            }
        }
    }

    /// Poll the instrument once, producing one reading per field.
    ///
    /// Synchronous with respect to the bus: the next command is not issued
    /// until the previous response window has closed.
    pub async fn read_data(&self, timing: &TimingSettings) -> Vec<Reading> {
        match self.kind {
            DeviceKind::PressureGauge { address } => gauge::read(self, address, timing).await,
            DeviceKind::TurboPump { address } => turbo::read(self, address, timing).await,
            DeviceKind::CurrentMeter => current_meter::read(self, timing).await,
        }
    }
}

/// Map a transport error to the reading status it represents.
pub(crate) fn bus_status(err: &BusError) -> ReadStatus {
    if err.is_disconnect() {
        ReadStatus::IoFault
    } else {
        ReadStatus::Error(err.to_string())
    }
}
