//! Pfeiffer vacuum gauge driver (MPT200 and compatible).
//!
//! One poll issues a single pressure query and then listens on the bus until
//! a line matching the expected address/action/parameter arrives, the read
//! deadline expires, or the transport fails. The listening loop is what
//! makes the driver robust on a multi-drop bus: command echoes and replies
//! addressed to other devices are skipped, not treated as errors.

use std::time::Instant;

use crate::config::TimingSettings;
use crate::protocol::{self, Scientific};
use crate::reading::{ReadStatus, Reading};

use super::{bus_status, Device};

/// Pfeiffer parameter id for the pressure reading.
const PRESSURE_PARAM: u16 = 740;

const FIELD: &str = "pressure";
const UNIT: &str = "mbar";

/// Poll the gauge once.
pub(super) async fn read(device: &Device, address: u16, timing: &TimingSettings) -> Vec<Reading> {
    vec![read_pressure(device, address, timing).await]
}

async fn read_pressure(device: &Device, address: u16, timing: &TimingSettings) -> Reading {
    let io = device.connection.io();
    let frame = protocol::encode_query(address, PRESSURE_PARAM);

    if let Err(e) = io.clear_input().await {
        return Reading::without_value(&device.name, FIELD, UNIT, bus_status(&e));
    }
    if let Err(e) = io.send(frame.as_bytes()).await {
        return Reading::without_value(&device.name, FIELD, UNIT, bus_status(&e));
    }

    let deadline = Instant::now() + timing.read_timeout();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Reading::without_value(&device.name, FIELD, UNIT, ReadStatus::Timeout);
        }

        let line = match io.read_line(remaining).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Reading::without_value(&device.name, FIELD, UNIT, ReadStatus::Timeout)
            }
            Err(e) => return Reading::without_value(&device.name, FIELD, UNIT, bus_status(&e)),
        };

        let Some(payload) =
            protocol::decode_reply(&line, address, protocol::REPLY_ACTION, PRESSURE_PARAM)
        else {
            // A reply for another bus address; keep listening.
            continue;
        };
        if protocol::is_echo(&payload) {
            continue;
        }

        return match protocol::decode_scientific(&payload) {
            Some(Scientific::Value(pressure)) => {
                Reading::ok(&device.name, FIELD, UNIT, pressure)
            }
            Some(Scientific::OverRange) => {
                Reading::without_value(&device.name, FIELD, UNIT, ReadStatus::OverRange)
            }
            Some(Scientific::LowVac) => {
                Reading::without_value(&device.name, FIELD, UNIT, ReadStatus::LowVac)
            }
            None => Reading::without_value(&device.name, FIELD, UNIT, ReadStatus::BadData),
        };
    }
}
