//! Low-level serial transport.
//!
//! [`SerialIo`] wraps the `serialport` crate and provides async I/O by
//! executing the blocking operations on Tokio's blocking task executor.
//! The port sits behind an `Arc<Mutex<..>>`; every operation takes the lock
//! for its full duration, so commands on a shared bus never interleave.

use async_trait::async_trait;
use log::debug;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Internal `serialport` read timeout. Per-operation deadlines are enforced
/// in [`BusIo::read_line`] on top of this.
const INNER_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Convenience alias for transport results.
pub type BusResult<T> = std::result::Result<T, BusError>;

/// Errors produced by the serial transport layer.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("serial port disconnected: {0}")]
    Disconnected(String),

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("failed to open serial port '{port}': {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },

    #[error("serial I/O task panicked: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl BusError {
    /// Transport-level disconnect signatures.
    ///
    /// A USB-serial adapter that drops off the bus surfaces as permission
    /// or I/O errors distinct from ordinary read timeouts; those are the
    /// conditions that warrant a close-and-reopen of the port.
    pub fn is_disconnect(&self) -> bool {
        match self {
            BusError::Disconnected(_) => true,
            BusError::Io(e) => is_disconnect_kind(e.kind()),
            BusError::Serial(e) => match e.kind() {
                serialport::ErrorKind::NoDevice => true,
                serialport::ErrorKind::Io(kind) => is_disconnect_kind(kind),
                _ => false,
            },
            _ => false,
        }
    }
}

fn is_disconnect_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::PermissionDenied
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::NotFound
    )
}

/// Byte-level access to one physical serial bus.
///
/// Implemented by [`SerialIo`] for real hardware and by
/// [`crate::bus::mock::MockBus`] for tests.
#[async_trait]
pub trait BusIo: Send + Sync {
    /// Discard any unread input (stale replies, bus noise).
    async fn clear_input(&self) -> BusResult<()>;

    /// Write raw bytes and flush.
    async fn send(&self, bytes: &[u8]) -> BusResult<()>;

    /// Read one CR-terminated line, waiting at most `deadline`.
    ///
    /// Returns `Ok(None)` when the deadline expires without a complete line;
    /// the terminator is stripped from the returned string.
    async fn read_line(&self, deadline: Duration) -> BusResult<Option<String>>;

    /// Drive the DTR and RTS control lines (instrument power-up sequences).
    async fn set_control_lines(&self, dtr: bool, rts: bool) -> BusResult<()>;

    /// Release the underlying handle. Further operations fail.
    async fn close(&self) -> BusResult<()>;
}

/// Real serial transport backed by the `serialport` crate.
pub struct SerialIo {
    port_name: String,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
}

impl SerialIo {
    /// Open `port_name` with the bus framing used by all our instruments:
    /// 8 data bits, no parity, 1 stop bit, no flow control.
    pub async fn open(port_name: &str, baud: u32) -> BusResult<Self> {
        let name = port_name.to_string();
        let open_name = name.clone();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&open_name, baud)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(INNER_READ_TIMEOUT)
                .open()
                .map_err(|e| BusError::Open {
                    port: open_name.clone(),
                    source: e,
                })
        })
        .await??;

        debug!("Serial port '{}' opened at {} baud", name, baud);
        Ok(Self {
            port_name: name,
            port: Arc::new(Mutex::new(Some(port))),
        })
    }

    fn not_connected(&self) -> BusError {
        BusError::Disconnected(format!("{} is closed", self.port_name))
    }
}

#[async_trait]
impl BusIo for SerialIo {
    async fn clear_input(&self) -> BusResult<()> {
        let port = Arc::clone(&self.port);
        let closed = self.not_connected();
        tokio::task::spawn_blocking(move || {
            let guard = port.blocking_lock();
            let port = guard.as_ref().ok_or(closed)?;
            port.clear(ClearBuffer::Input)?;
            Ok(())
        })
        .await?
    }

    async fn send(&self, bytes: &[u8]) -> BusResult<()> {
        let port = Arc::clone(&self.port);
        let closed = self.not_connected();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut guard = port.blocking_lock();
            let port = guard.as_mut().ok_or(closed)?;
            port.write_all(&bytes)?;
            port.flush()?;
            Ok(())
        })
        .await?
    }

    async fn read_line(&self, deadline: Duration) -> BusResult<Option<String>> {
        let port = Arc::clone(&self.port);
        let closed = self.not_connected();
        tokio::task::spawn_blocking(move || {
            use std::io::Read;

            let mut guard = port.blocking_lock();
            let port = guard.as_mut().ok_or(closed)?;

            let start = Instant::now();
            let mut line = String::new();
            let mut buf = [0u8; 1];

            loop {
                if start.elapsed() > deadline {
                    return Ok(None);
                }
                match port.read(&mut buf) {
                    Ok(1) => {
                        let ch = buf[0] as char;
                        if ch == '\r' {
                            return Ok(Some(line.trim().to_string()));
                        }
                        line.push(ch);
                    }
                    Ok(_) => {
                        return Err(BusError::Disconnected(
                            "unexpected EOF from serial port".to_string(),
                        ));
                    }
                    // Inner port timeout is shorter than the deadline.
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => return Err(BusError::from(e)),
                }
            }
        })
        .await?
    }

    async fn set_control_lines(&self, dtr: bool, rts: bool) -> BusResult<()> {
        let port = Arc::clone(&self.port);
        let closed = self.not_connected();
        tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            let port = guard.as_mut().ok_or(closed)?;
            port.write_data_terminal_ready(dtr)?;
            port.write_request_to_send(rts)?;
            Ok(())
        })
        .await?
    }

    async fn close(&self) -> BusResult<()> {
        let mut guard = self.port.lock().await;
        if guard.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_classification() {
        let denied =
            BusError::Io(std::io::Error::new(ErrorKind::PermissionDenied, "access is denied"));
        assert!(denied.is_disconnect());

        let timeout = BusError::Io(std::io::Error::new(ErrorKind::TimedOut, "timed out"));
        assert!(!timeout.is_disconnect());

        assert!(BusError::Disconnected("gone".to_string()).is_disconnect());

        let no_device = BusError::Serial(serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "unplugged",
        ));
        assert!(no_device.is_disconnect());
    }
}
