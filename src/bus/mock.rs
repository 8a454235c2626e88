//! Scripted bus transport for tests.
//!
//! [`MockBus`] answers `read_line` from a queue of scripted lines and records
//! everything written to it. Failure injection covers both single-shot errors
//! and a persistent "unplugged" state that makes every operation report a
//! disconnect, which is how recovery paths are exercised without hardware.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::connection::{Connection, PortOpener};
use super::transport::{BusError, BusIo, BusResult};

/// In-memory scripted serial bus.
#[derive(Clone, Default)]
pub struct MockBus {
    responses: Arc<Mutex<VecDeque<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    control_lines: Arc<Mutex<Vec<(bool, bool)>>>,
    disconnected: Arc<AtomicBool>,
    fail_next: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MockBus {
    /// A bus with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply line; each `read_line` call pops one.
    pub fn push_response(&self, line: &str) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(line.to_string());
    }

    /// Everything written to the bus, in order, as lossy UTF-8.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded `(dtr, rts)` transitions.
    pub fn control_line_calls(&self) -> Vec<(bool, bool)> {
        self.control_lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Simulate the USB adapter vanishing: every subsequent operation
    /// reports a disconnect until the flag is cleared.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// Fail only the next operation with a disconnect.
    pub fn inject_next_failure(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Disconnected("mock bus closed".to_string()));
        }
        if self.disconnected.load(Ordering::SeqCst) || self.fail_next.swap(false, Ordering::SeqCst)
        {
            return Err(BusError::Disconnected(
                "mock bus: input/output error".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BusIo for MockBus {
    async fn clear_input(&self) -> BusResult<()> {
        self.check_failure()
    }

    async fn send(&self, bytes: &[u8]) -> BusResult<()> {
        self.check_failure()?;
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    async fn read_line(&self, _deadline: Duration) -> BusResult<Option<String>> {
        self.check_failure()?;
        Ok(self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front())
    }

    async fn set_control_lines(&self, dtr: bool, rts: bool) -> BusResult<()> {
        self.check_failure()?;
        self.control_lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((dtr, rts));
        Ok(())
    }

    async fn close(&self) -> BusResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// [`PortOpener`] handing out scripted buses.
///
/// Buses queued with [`MockOpener::add_bus`] are handed out per port in
/// order; once a port's queue runs dry, fresh empty buses are produced.
#[derive(Default)]
pub struct MockOpener {
    scripted: Mutex<HashMap<String, VecDeque<MockBus>>>,
    opened: Mutex<Vec<String>>,
    fail_next_open: AtomicBool,
}

impl MockOpener {
    /// An opener that produces empty buses on demand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `bus` to be handed out for the next open of `port`.
    pub fn add_bus(&self, port: &str, bus: MockBus) {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(port.to_string())
            .or_default()
            .push_back(bus);
    }

    /// Make the next `open` call fail, as a still-enumerating port would.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Ports opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PortOpener for MockOpener {
    async fn open(&self, port: &str, baud: u32) -> BusResult<Connection> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(BusError::Disconnected(format!(
                "mock opener: {port} not ready"
            )));
        }
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(port.to_string());
        let bus = self
            .scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(port)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(Connection::new(port.to_string(), baud, Box::new(bus)))
    }
}
