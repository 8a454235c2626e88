//! Connection recovery after a transport-level fault.
//!
//! When a USB-serial adapter drops off the bus, every logical device on that
//! port is stranded on a dead handle. Recovery closes the old handle, waits
//! for the OS to re-enumerate the adapter, reopens the port, and rebinds
//! every device sharing that port — not just the one whose read surfaced the
//! fault. Skipping co-resident devices would leave them permanently broken
//! even though the bus itself is healthy again.

use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::sleep;

use crate::bus::ConnectionRegistry;
use crate::device::Device;
use crate::error::AppResult;

/// Reopens faulted ports and rebinds the devices that share them.
pub struct RecoveryManager {
    settle: Duration,
}

impl RecoveryManager {
    /// `settle` is the wait between closing and reopening the port, giving
    /// the OS time to re-enumerate the USB device.
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    /// Recover the connection of `devices[faulted]`.
    ///
    /// On success, every device whose connection shares the faulted port has
    /// been rebound to the new connection; the indices of the rebound
    /// devices are returned. On failure nothing is rebound — the caller
    /// logs and retries on the next fault detection, never in a loop here.
    pub async fn recover(
        &self,
        faulted: usize,
        devices: &mut [Device],
        registry: &mut ConnectionRegistry,
    ) -> AppResult<Vec<usize>> {
        // The faulted connection still remembers its configuration; capture
        // it before touching the handle.
        let dead = devices[faulted].connection.clone();
        let port = dead.port().to_string();
        let baud = dead.baud();

        info!(
            "Recovering '{}': reopening {} at {} baud",
            devices[faulted].name, port, baud
        );

        if let Err(e) = dead.close().await {
            debug!("Close of faulted {} failed (ignored): {}", port, e);
        }

        debug!("Waiting {:?} for driver re-enumeration", self.settle);
        sleep(self.settle).await;

        let new_conn = match registry.reopen(&port, baud).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Reopen of {} failed: {}", port, e);
                return Err(e.into());
            }
        };

        let mut rebound = Vec::new();
        for (index, device) in devices.iter_mut().enumerate() {
            if device.connection.port() == port {
                device.connection = new_conn.clone();
                rebound.push(index);
            }
        }

        info!("Rebound {} device(s) to reopened {}", rebound.len(), port);
        Ok(rebound)
    }
}
