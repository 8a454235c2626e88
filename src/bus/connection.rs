//! Connections and the per-port registry.
//!
//! A [`Connection`] owns one physical serial handle; devices hold it through
//! an `Arc` and never own the handle themselves. The registry guarantees at
//! most one live connection per port, so two devices declaring the same port
//! always share the same multi-drop bus handle.

use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::transport::{BusIo, BusResult, SerialIo};

/// One physical serial connection.
pub struct Connection {
    port: String,
    baud: u32,
    io: Box<dyn BusIo>,
}

impl Connection {
    /// Wrap an already-open transport. Prefer [`ConnectionRegistry::open`].
    pub fn new(port: String, baud: u32, io: Box<dyn BusIo>) -> Self {
        Self { port, baud, io }
    }

    /// Port path this connection was opened on, e.g. `/dev/ttyUSB0`.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Configured baud rate. Survives a dead handle, which is what recovery
    /// reads its reopen parameters from.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Byte-level access to the bus.
    pub fn io(&self) -> &dyn BusIo {
        self.io.as_ref()
    }

    /// Release the underlying handle.
    pub async fn close(&self) -> BusResult<()> {
        self.io.close().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port)
            .field("baud", &self.baud)
            .finish_non_exhaustive()
    }
}

/// Seam for opening physical ports, so tests can inject scripted transports.
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open `port` at `baud` and wrap it in a [`Connection`].
    async fn open(&self, port: &str, baud: u32) -> BusResult<Connection>;
}

/// Opens real ports via [`SerialIo`].
pub struct SerialOpener;

#[async_trait]
impl PortOpener for SerialOpener {
    async fn open(&self, port: &str, baud: u32) -> BusResult<Connection> {
        let io = SerialIo::open(port, baud).await?;
        Ok(Connection::new(port.to_string(), baud, Box::new(io)))
    }
}

/// Owns every live connection, keyed by port path.
pub struct ConnectionRegistry {
    opener: Box<dyn PortOpener>,
    connections: HashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry using `opener` for all port opens.
    pub fn new(opener: Box<dyn PortOpener>) -> Self {
        Self {
            opener,
            connections: HashMap::new(),
        }
    }

    /// Open `port`, or return the existing connection if it is already open.
    ///
    /// Two devices declaring the same port resolve to the same `Arc`, never
    /// to two independent handles on one physical bus.
    pub async fn open(&mut self, port: &str, baud: u32) -> BusResult<Arc<Connection>> {
        if let Some(existing) = self.connections.get(port) {
            return Ok(Arc::clone(existing));
        }
        let conn = Arc::new(self.opener.open(port, baud).await?);
        self.connections.insert(port.to_string(), Arc::clone(&conn));
        info!("Opened {} at {} baud", port, baud);
        Ok(conn)
    }

    /// Open a fresh connection on `port`, replacing any registered one.
    ///
    /// Used by recovery after the old handle has been closed; devices still
    /// holding the stale `Arc` must be rebound by the caller.
    pub async fn reopen(&mut self, port: &str, baud: u32) -> BusResult<Arc<Connection>> {
        let conn = Arc::new(self.opener.open(port, baud).await?);
        self.connections.insert(port.to_string(), Arc::clone(&conn));
        info!("Reopened {} at {} baud", port, baud);
        Ok(conn)
    }

    /// Look up the live connection for `port`.
    pub fn get(&self, port: &str) -> Option<Arc<Connection>> {
        self.connections.get(port).map(Arc::clone)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every unique connection exactly once and forget them all.
    pub async fn close_all(&mut self) {
        for (port, conn) in self.connections.drain() {
            match conn.close().await {
                Ok(()) => info!("Closed port {}", port),
                Err(e) => warn!("Error closing {}: {}", port, e),
            }
        }
    }
}
