//! Keithley-style current meter driver.
//!
//! Unlike the Pfeiffer instruments, the meter speaks a plain ASCII
//! query/response line protocol with no addressing or checksums. Power-up
//! requires asserting DTR and RTS and pinning the output format so the first
//! comma-delimited field of a `:READ?` reply is the current in amps.

use tokio::time::{sleep, Duration};

use crate::bus::BusResult;
use crate::config::TimingSettings;
use crate::reading::{ReadStatus, Reading};

use super::{bus_status, Device};

const FORMAT_CMD: &[u8] = b":FORM:ELEM CURR2\r";
const READ_CMD: &[u8] = b":READ?\r";

const FIELD: &str = "current";
const UNIT: &str = "A";

/// One-time power-up: control lines up, settle, pin the output format.
pub(super) async fn initialize(device: &Device) -> BusResult<()> {
    let io = device.connection.io();
    io.set_control_lines(true, true).await?;
    sleep(Duration::from_millis(200)).await;
    io.send(FORMAT_CMD).await
}

/// Poll the meter once.
pub(super) async fn read(device: &Device, timing: &TimingSettings) -> Vec<Reading> {
    vec![read_current(device, timing).await]
}

async fn read_current(device: &Device, timing: &TimingSettings) -> Reading {
    let io = device.connection.io();

    if let Err(e) = io.clear_input().await {
        return Reading::without_value(&device.name, FIELD, UNIT, bus_status(&e));
    }
    if let Err(e) = io.send(READ_CMD).await {
        return Reading::without_value(&device.name, FIELD, UNIT, bus_status(&e));
    }

    let line = match io.read_line(timing.read_timeout()).await {
        Ok(Some(line)) => line,
        Ok(None) => return Reading::without_value(&device.name, FIELD, UNIT, ReadStatus::Timeout),
        Err(e) => return Reading::without_value(&device.name, FIELD, UNIT, bus_status(&e)),
    };

    // Fields arrive in the order pinned by the :FORM:ELEM setup. If the
    // meter is power-cycled externally, that setup is lost and the leading
    // token may be a different quantity; this parse cannot detect that.
    let token = line.split(',').next().unwrap_or("").trim();
    match token.parse::<f64>() {
        Ok(value) => Reading::ok(&device.name, FIELD, UNIT, value),
        Err(e) => Reading::without_value(
            &device.name,
            FIELD,
            UNIT,
            ReadStatus::Error(format!("unparseable reply '{token}': {e}")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::bus::Connection;
    use crate::device::DeviceKind;
    use std::sync::Arc;

    fn fast_timing() -> TimingSettings {
        TimingSettings {
            read_timeout_ms: 50,
            turbo_settle_ms: 1,
            recovery_settle_ms: 0,
            cycle_interval_ms: 10,
        }
    }

    fn meter_on(bus: MockBus) -> Device {
        let conn = Connection::new("/dev/ttyUSB3".to_string(), 9600, Box::new(bus));
        Device::new("meter".to_string(), DeviceKind::CurrentMeter, Arc::new(conn))
    }

    #[tokio::test]
    async fn initialize_raises_control_lines_and_sets_format() {
        let bus = MockBus::new();
        let device = meter_on(bus.clone());
        device.initialize().await;

        assert_eq!(bus.control_line_calls(), vec![(true, true)]);
        assert_eq!(bus.sent(), vec![":FORM:ELEM CURR2\r".to_string()]);
    }

    #[tokio::test]
    async fn parses_leading_token_of_reply() {
        let bus = MockBus::new();
        bus.push_response("+1.234567E-03,+2.000000E+00");
        let device = meter_on(bus.clone());

        let readings = device.read_data(&fast_timing()).await;
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].status, ReadStatus::Ok);
        let value = readings[0].value.unwrap();
        assert!((value - 1.234567e-3).abs() < 1e-12);
        assert_eq!(readings[0].unit, "A");
        assert_eq!(bus.sent(), vec![":READ?\r".to_string()]);
    }

    #[tokio::test]
    async fn garbage_reply_is_an_error() {
        let bus = MockBus::new();
        bus.push_response("ERROR -113");
        let device = meter_on(bus);

        let readings = device.read_data(&fast_timing()).await;
        assert!(matches!(readings[0].status, ReadStatus::Error(_)));
        assert_eq!(readings[0].value, None);
    }

    #[tokio::test]
    async fn silent_meter_times_out() {
        let device = meter_on(MockBus::new());
        let readings = device.read_data(&fast_timing()).await;
        assert_eq!(readings[0].status, ReadStatus::Timeout);
    }
}
