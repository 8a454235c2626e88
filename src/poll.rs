//! The polling loop.
//!
//! Devices are swept in a fixed, stable order once per cycle. Each read is
//! an isolated failure boundary: drivers report every outcome as a reading
//! status, so one misbehaving device can never abort the rest of the sweep.
//! A transport fault triggers connection recovery synchronously, before the
//! next device is polled. Shutdown is cooperative: the signal is observed
//! between cycles and never interrupts a device mid-read.

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::bus::ConnectionRegistry;
use crate::config::TimingSettings;
use crate::device::Device;
use crate::reading::ReadStatus;
use crate::recovery::RecoveryManager;
use crate::sink::ReadingSink;

/// Top-level driver: polls the device set on a fixed cadence and forwards
/// valid readings to the sink.
pub struct PollLoop {
    devices: Vec<Device>,
    registry: ConnectionRegistry,
    recovery: RecoveryManager,
    sink: Box<dyn ReadingSink>,
    timing: TimingSettings,
    shutdown: watch::Receiver<bool>,
}

impl PollLoop {
    /// Assemble a loop over `devices`, which must have been bound to
    /// connections owned by `registry`.
    pub fn new(
        devices: Vec<Device>,
        registry: ConnectionRegistry,
        sink: Box<dyn ReadingSink>,
        timing: TimingSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let recovery = RecoveryManager::new(timing.recovery_settle());
        Self {
            devices,
            registry,
            recovery,
            sink,
            timing,
            shutdown,
        }
    }

    /// The configured device set, in polling order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Run until the shutdown signal fires, then close every unique
    /// connection exactly once.
    pub async fn run(mut self) {
        info!("Starting monitor with {} device(s)", self.devices.len());

        for device in &self.devices {
            device.initialize().await;
        }

        loop {
            self.poll_cycle().await;

            let interval = self.timing.cycle_interval();
            tokio::select! {
                _ = sleep(interval) => {}
                _ = self.shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.registry.close_all().await;
        info!("Monitor stopped");
    }

    /// One full sweep over the device set.
    pub async fn poll_cycle(&mut self) {
        for index in 0..self.devices.len() {
            let readings = self.devices[index].read_data(&self.timing).await;

            let mut faulted = false;
            for reading in &readings {
                if reading.status == ReadStatus::IoFault {
                    faulted = true;
                }
                if reading.value.is_some() {
                    if let Err(e) = self.sink.record(reading).await {
                        warn!("Sink write failed for '{}': {}", reading.device, e);
                    }
                } else {
                    debug!(
                        "{} {}: {:?}",
                        reading.device, reading.field, reading.status
                    );
                }
            }

            if faulted {
                warn!(
                    "Transport fault on '{}', starting recovery",
                    self.devices[index].name
                );
                match self
                    .recovery
                    .recover(index, &mut self.devices, &mut self.registry)
                    .await
                {
                    Ok(rebound) => debug!("Recovery rebound devices {:?}", rebound),
                    Err(e) => warn!("Recovery failed, retrying on next fault: {}", e),
                }
            }
        }
    }
}
