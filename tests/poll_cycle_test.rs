//! Full poll-cycle integration tests using scripted bus transports.

use std::sync::Arc;
use std::time::Duration;

use slowmon::bus::mock::{MockBus, MockOpener};
use slowmon::bus::ConnectionRegistry;
use slowmon::config::TimingSettings;
use slowmon::device::{Device, DeviceKind};
use slowmon::poll::PollLoop;
use slowmon::protocol::{checksum, REPLY_ACTION};
use slowmon::reading::ReadStatus;
use slowmon::sink::MemorySink;
use tokio::sync::watch;

fn fast_timing() -> TimingSettings {
    TimingSettings {
        read_timeout_ms: 50,
        turbo_settle_ms: 1,
        recovery_settle_ms: 0,
        cycle_interval_ms: 5,
    }
}

/// Build a frame-protocol reply the way a Pfeiffer unit would.
fn reply(address: u16, param: u16, payload: &str) -> String {
    let body = format!(
        "{address:03}{REPLY_ACTION}{param:03}{:02}{payload}",
        payload.len()
    );
    let chk = checksum(&body);
    format!("{body}{chk:03}")
}

fn push_pump_replies(bus: &MockBus, address: u16, freq: &str, temp: &str, power: &str) {
    bus.push_response(&reply(address, 309, freq));
    bus.push_response(&reply(address, 346, temp));
    bus.push_response(&reply(address, 330, power));
}

/// Three devices, two sharing one bus: a well-formed cycle yields one gauge
/// reading and three readings per pump, all OK, all forwarded to the sink.
#[tokio::test]
async fn full_cycle_produces_seven_readings() {
    let gauge_bus = MockBus::new();
    gauge_bus.push_response(&reply(3, 740, "100020"));

    let pump_bus = MockBus::new();
    push_pump_replies(&pump_bus, 5, "000820", "000042", "000015");
    push_pump_replies(&pump_bus, 1, "000810", "000038", "000012");

    let opener = MockOpener::new();
    opener.add_bus("/dev/ttyUSB1", gauge_bus);
    opener.add_bus("/dev/ttyUSB0", pump_bus);

    let mut registry = ConnectionRegistry::new(Box::new(opener));
    let gauge_conn = registry.open("/dev/ttyUSB1", 9600).await.unwrap();
    let pump_conn = registry.open("/dev/ttyUSB0", 9600).await.unwrap();

    let devices = vec![
        Device::new(
            "gauge".to_string(),
            DeviceKind::PressureGauge { address: 3 },
            gauge_conn,
        ),
        Device::new(
            "pump5".to_string(),
            DeviceKind::TurboPump { address: 5 },
            Arc::clone(&pump_conn),
        ),
        Device::new(
            "pump1".to_string(),
            DeviceKind::TurboPump { address: 1 },
            pump_conn,
        ),
    ];

    let sink = MemorySink::new();
    let (_tx, rx) = watch::channel(false);
    let mut poll = PollLoop::new(devices, registry, Box::new(sink.clone()), fast_timing(), rx);

    poll.poll_cycle().await;

    let records = sink.records();
    assert_eq!(records.len(), 7);
    assert!(records.iter().all(|r| r.status == ReadStatus::Ok));

    assert_eq!(records[0].device, "gauge");
    assert_eq!(records[0].value, Some(1.0));

    let pump5: Vec<_> = records.iter().filter(|r| r.device == "pump5").collect();
    assert_eq!(pump5.len(), 3);
    assert_eq!(pump5[0].value, Some(820.0));

    let pump1: Vec<_> = records.iter().filter(|r| r.device == "pump1").collect();
    assert_eq!(pump1.len(), 3);
    assert_eq!(pump1[2].value, Some(12.0));
}

/// A failing device in the middle of the sweep must not block its neighbors.
#[tokio::test]
async fn fault_on_one_device_does_not_stop_the_cycle() {
    let gauge_bus = MockBus::new();
    gauge_bus.push_response(&reply(3, 740, "100020"));

    let dead_bus = MockBus::new();
    dead_bus.set_disconnected(true);

    let meter_bus = MockBus::new();
    meter_bus.push_response("+2.500000E-04,+0.000000E+00");

    let opener = MockOpener::new();
    opener.add_bus("/dev/ttyUSB0", gauge_bus);
    opener.add_bus("/dev/ttyUSB1", dead_bus);
    opener.add_bus("/dev/ttyUSB2", meter_bus);

    let mut registry = ConnectionRegistry::new(Box::new(opener));
    let devices = vec![
        Device::new(
            "gauge".to_string(),
            DeviceKind::PressureGauge { address: 3 },
            registry.open("/dev/ttyUSB0", 9600).await.unwrap(),
        ),
        Device::new(
            "pump".to_string(),
            DeviceKind::TurboPump { address: 5 },
            registry.open("/dev/ttyUSB1", 9600).await.unwrap(),
        ),
        Device::new(
            "meter".to_string(),
            DeviceKind::CurrentMeter,
            registry.open("/dev/ttyUSB2", 9600).await.unwrap(),
        ),
    ];

    let sink = MemorySink::new();
    let (_tx, rx) = watch::channel(false);
    let mut poll = PollLoop::new(devices, registry, Box::new(sink.clone()), fast_timing(), rx);

    poll.poll_cycle().await;

    let records = sink.records();
    let devices_seen: Vec<_> = records.iter().map(|r| r.device.as_str()).collect();
    assert!(devices_seen.contains(&"gauge"));
    assert!(devices_seen.contains(&"meter"));
    // The faulted pump forwarded nothing.
    assert!(!devices_seen.contains(&"pump"));
}

/// An IOFault triggers recovery within the same cycle, and every device on
/// the faulted port ends up on the same fresh connection.
#[tokio::test]
async fn recovery_rebinds_all_devices_sharing_the_port() {
    let dead_bus = MockBus::new();
    dead_bus.set_disconnected(true);

    let opener = MockOpener::new();
    opener.add_bus("/dev/ttyUSB0", dead_bus);

    let mut registry = ConnectionRegistry::new(Box::new(opener));
    let shared = registry.open("/dev/ttyUSB0", 9600).await.unwrap();
    let old_conn = Arc::clone(&shared);

    let devices = vec![
        Device::new(
            "pump5".to_string(),
            DeviceKind::TurboPump { address: 5 },
            Arc::clone(&shared),
        ),
        Device::new(
            "pump1".to_string(),
            DeviceKind::TurboPump { address: 1 },
            shared,
        ),
    ];

    let sink = MemorySink::new();
    let (_tx, rx) = watch::channel(false);
    let mut poll = PollLoop::new(devices, registry, Box::new(sink.clone()), fast_timing(), rx);

    poll.poll_cycle().await;

    let devices = poll.devices();
    assert!(Arc::ptr_eq(&devices[0].connection, &devices[1].connection));
    assert!(!Arc::ptr_eq(&devices[0].connection, &old_conn));
    assert_eq!(devices[0].connection.port(), "/dev/ttyUSB0");
}

/// Shutdown closes each unique connection exactly once.
#[tokio::test]
async fn shutdown_closes_shared_connections_once() {
    let shared_bus = MockBus::new();
    let solo_bus = MockBus::new();

    let opener = MockOpener::new();
    opener.add_bus("/dev/ttyUSB0", shared_bus.clone());
    opener.add_bus("/dev/ttyUSB2", solo_bus.clone());

    let mut registry = ConnectionRegistry::new(Box::new(opener));
    let shared = registry.open("/dev/ttyUSB0", 9600).await.unwrap();
    let devices = vec![
        Device::new(
            "pump5".to_string(),
            DeviceKind::TurboPump { address: 5 },
            Arc::clone(&shared),
        ),
        Device::new(
            "pump1".to_string(),
            DeviceKind::TurboPump { address: 1 },
            shared,
        ),
        Device::new(
            "meter".to_string(),
            DeviceKind::CurrentMeter,
            registry.open("/dev/ttyUSB2", 9600).await.unwrap(),
        ),
    ];

    let sink = MemorySink::new();
    let (tx, rx) = watch::channel(false);
    let poll = PollLoop::new(devices, registry, Box::new(sink), fast_timing(), rx);

    let handle = tokio::spawn(poll.run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poll loop did not stop")
        .unwrap();

    assert!(shared_bus.is_closed());
    assert!(solo_bus.is_closed());
}
