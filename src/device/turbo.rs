//! Pfeiffer turbo-molecular pump driver (TC400 and compatible).
//!
//! One poll issues three sequential parameter queries — rotation frequency,
//! motor temperature, power draw — each followed by the pump's turnaround
//! delay and a single read attempt. Sub-reads are independent: a bad or
//! missing response for one parameter yields that one degraded reading and
//! the poll moves on to the next parameter.

use tokio::time::sleep;

use crate::config::TimingSettings;
use crate::protocol;
use crate::reading::{ReadStatus, Reading};

use super::{bus_status, Device};

/// Polled parameters, in the fixed reporting order.
const PARAMS: [(u16, &str, &str); 3] = [
    (309, "frequency", "Hz"),
    (346, "motor_temp", "C"),
    (330, "power_consumption", "W"),
];

/// Poll the pump once; always returns three readings, in `PARAMS` order.
pub(super) async fn read(device: &Device, address: u16, timing: &TimingSettings) -> Vec<Reading> {
    let mut readings = Vec::with_capacity(PARAMS.len());
    for (param, field, unit) in PARAMS {
        readings.push(read_param(device, address, param, field, unit, timing).await);
    }
    readings
}

async fn read_param(
    device: &Device,
    address: u16,
    param: u16,
    field: &str,
    unit: &str,
    timing: &TimingSettings,
) -> Reading {
    let io = device.connection.io();
    let frame = protocol::encode_query(address, param);

    if let Err(e) = io.clear_input().await {
        return Reading::without_value(&device.name, field, unit, bus_status(&e));
    }
    if let Err(e) = io.send(frame.as_bytes()).await {
        return Reading::without_value(&device.name, field, unit, bus_status(&e));
    }

    // The pump needs a moment before it answers; reading earlier yields
    // nothing or a truncated frame.
    sleep(timing.turbo_settle()).await;

    let line = match io.read_line(timing.read_timeout()).await {
        Ok(Some(line)) => line,
        Ok(None) => return Reading::without_value(&device.name, field, unit, ReadStatus::Timeout),
        Err(e) => return Reading::without_value(&device.name, field, unit, bus_status(&e)),
    };

    let Some(payload) = protocol::decode_reply(&line, address, protocol::REPLY_ACTION, param)
    else {
        return Reading::without_value(&device.name, field, unit, ReadStatus::BadPacket);
    };

    match protocol::decode_integer(&payload) {
        Some(value) => Reading::ok(&device.name, field, unit, value as f64),
        None => Reading::without_value(&device.name, field, unit, ReadStatus::BadData),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::bus::Connection;
    use crate::device::DeviceKind;
    use crate::protocol::{checksum, REPLY_ACTION};
    use std::sync::Arc;

    fn fast_timing() -> TimingSettings {
        TimingSettings {
            read_timeout_ms: 50,
            turbo_settle_ms: 1,
            recovery_settle_ms: 0,
            cycle_interval_ms: 10,
        }
    }

    fn reply(address: u16, param: u16, payload: &str) -> String {
        let body = format!("{address:03}{REPLY_ACTION}{param:03}{:02}{payload}", payload.len());
        let chk = checksum(&body);
        format!("{body}{chk:03}")
    }

    fn pump_on(bus: MockBus, address: u16) -> Device {
        let conn = Connection::new("/dev/ttyUSB0".to_string(), 9600, Box::new(bus));
        Device::new(
            "pump".to_string(),
            DeviceKind::TurboPump { address },
            Arc::new(conn),
        )
    }

    #[tokio::test]
    async fn reads_all_three_parameters_in_order() {
        let bus = MockBus::new();
        bus.push_response(&reply(5, 309, "000820"));
        bus.push_response(&reply(5, 346, "000042"));
        bus.push_response(&reply(5, 330, "000015"));
        let device = pump_on(bus, 5);

        let readings = device.read_data(&fast_timing()).await;
        assert_eq!(readings.len(), 3);

        assert_eq!(readings[0].field, "frequency");
        assert_eq!(readings[0].unit, "Hz");
        assert_eq!(readings[0].value, Some(820.0));

        assert_eq!(readings[1].field, "motor_temp");
        assert_eq!(readings[1].unit, "C");
        assert_eq!(readings[1].value, Some(42.0));

        assert_eq!(readings[2].field, "power_consumption");
        assert_eq!(readings[2].unit, "W");
        assert_eq!(readings[2].value, Some(15.0));
    }

    #[tokio::test]
    async fn one_bad_parameter_does_not_block_the_others() {
        let bus = MockBus::new();
        bus.push_response(&reply(5, 309, "000820"));
        // Missing reply for 346; the 330 reply arrives in its slot instead.
        bus.push_response(&reply(5, 330, "000015"));
        let device = pump_on(bus, 5);

        let readings = device.read_data(&fast_timing()).await;
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].status, ReadStatus::Ok);
        // The mismatched line is a bad packet for the temp slot...
        assert_eq!(readings[1].status, ReadStatus::BadPacket);
        // ...and the power slot then has nothing left to read.
        assert_eq!(readings[2].status, ReadStatus::Timeout);
    }

    #[tokio::test]
    async fn non_numeric_payload_is_bad_data() {
        let bus = MockBus::new();
        bus.push_response(&reply(5, 309, "82xHz0"));
        bus.push_response(&reply(5, 346, "000042"));
        bus.push_response(&reply(5, 330, "000015"));
        let device = pump_on(bus, 5);

        let readings = device.read_data(&fast_timing()).await;
        assert_eq!(readings[0].status, ReadStatus::BadData);
        assert_eq!(readings[1].status, ReadStatus::Ok);
        assert_eq!(readings[2].status, ReadStatus::Ok);
    }

    #[tokio::test]
    async fn silent_pump_times_out_per_parameter() {
        let device = pump_on(MockBus::new(), 5);
        let readings = device.read_data(&fast_timing()).await;
        assert_eq!(readings.len(), 3);
        for reading in &readings {
            assert_eq!(reading.status, ReadStatus::Timeout);
            assert_eq!(reading.value, None);
        }
    }

    #[tokio::test]
    async fn disconnect_yields_io_fault_for_each_parameter() {
        let bus = MockBus::new();
        bus.set_disconnected(true);
        let device = pump_on(bus, 5);

        let readings = device.read_data(&fast_timing()).await;
        assert_eq!(readings.len(), 3);
        for reading in &readings {
            assert_eq!(reading.status, ReadStatus::IoFault);
        }
    }
}
