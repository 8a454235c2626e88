//! Configuration loading for the monitor.
//!
//! Settings come from a TOML file merged with `SLOWMON_`-prefixed
//! environment variables:
//!
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [sink]
//! url = "http://localhost:8086"
//! org = "Exotic_atoms_lab"
//! bucket = "Slow Control"
//! token = "..."
//!
//! [timing]
//! read_timeout_ms = 2000
//!
//! [[devices]]
//! name = "Target chamber vacuum gauge"
//! kind = "pressure_gauge"
//! port = "/dev/ttyUSB1"
//! baud = 9600
//! address = 3
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::device::DeviceKind;
use crate::error::{AppResult, MonitorError};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application-level settings.
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Time-series sink connection settings.
    pub sink: SinkSettings,
    /// Poll and recovery timing knobs.
    #[serde(default)]
    pub timing: TimingSettings,
    /// Static device registry: which instrument lives on which port.
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// InfluxDB 2.x sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSettings {
    /// Server URL, e.g. `http://localhost:8086`.
    pub url: String,
    /// Organization name.
    pub org: String,
    /// Target bucket.
    pub bucket: String,
    /// API token.
    pub token: String,
}

/// Timing knobs for polling and recovery.
///
/// The defaults are the empirically required values for the lab's buses;
/// tests shrink them to keep suites fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Per-command read deadline in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Turbo pump command turnaround before the single read attempt.
    #[serde(default = "default_turbo_settle_ms")]
    pub turbo_settle_ms: u64,
    /// Wait for OS re-enumeration between closing and reopening a port.
    #[serde(default = "default_recovery_settle_ms")]
    pub recovery_settle_ms: u64,
    /// Sleep between full device sweeps.
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            turbo_settle_ms: default_turbo_settle_ms(),
            recovery_settle_ms: default_recovery_settle_ms(),
            cycle_interval_ms: default_cycle_interval_ms(),
        }
    }
}

impl TimingSettings {
    /// Per-command read deadline.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Turbo pump turnaround delay.
    pub fn turbo_settle(&self) -> Duration {
        Duration::from_millis(self.turbo_settle_ms)
    }

    /// Port re-enumeration settle interval.
    pub fn recovery_settle(&self) -> Duration {
        Duration::from_millis(self.recovery_settle_ms)
    }

    /// Inter-cycle sleep.
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

/// Instrument family of a configured device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKindConfig {
    /// Pfeiffer vacuum gauge (checksummed frame protocol).
    PressureGauge,
    /// Pfeiffer turbo-molecular pump (checksummed frame protocol).
    TurboPump,
    /// Keithley-style current meter (plain ASCII line protocol).
    CurrentMeter,
}

/// One entry of the static device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Human-readable device name, used as the sink tag.
    pub name: String,
    /// Instrument family.
    pub kind: DeviceKindConfig,
    /// Serial port path.
    pub port: String,
    /// Baud rate.
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// RS-485 bus address, required for the frame-protocol instruments.
    #[serde(default)]
    pub address: Option<u16>,
}

impl DeviceDefinition {
    /// Resolve the configured kind and address into a [`DeviceKind`].
    pub fn device_kind(&self) -> AppResult<DeviceKind> {
        let address = || {
            self.address.ok_or_else(|| {
                MonitorError::Configuration(format!("device '{}' requires an address", self.name))
            })
        };
        Ok(match self.kind {
            DeviceKindConfig::PressureGauge => DeviceKind::PressureGauge {
                address: address()?,
            },
            DeviceKindConfig::TurboPump => DeviceKind::TurboPump {
                address: address()?,
            },
            DeviceKindConfig::CurrentMeter => DeviceKind::CurrentMeter,
        })
    }
}

impl Settings {
    /// Load settings from `path`, apply environment overrides, validate.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SLOWMON_").split("_"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what deserialization catches.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(MonitorError::Configuration(format!(
                "invalid log_level '{}'; must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut names = std::collections::HashSet::new();
        for device in &self.devices {
            if !names.insert(&device.name) {
                return Err(MonitorError::Configuration(format!(
                    "duplicate device name: '{}'",
                    device.name
                )));
            }
            if let Some(address) = device.address {
                if address > 999 {
                    return Err(MonitorError::Configuration(format!(
                        "device '{}': address {} out of range 0..=999",
                        device.name, address
                    )));
                }
            }
            // Surfaces a missing address at load time, not on the first poll.
            device.device_kind()?;
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_turbo_settle_ms() -> u64 {
    150
}

fn default_recovery_settle_ms() -> u64 {
    3000
}

fn default_cycle_interval_ms() -> u64 {
    2000
}
