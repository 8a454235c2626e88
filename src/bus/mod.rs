//! Serial bus transport, connections, and the per-port registry.

mod connection;
pub mod mock;
mod transport;

pub use connection::{Connection, ConnectionRegistry, PortOpener, SerialOpener};
pub use transport::{BusError, BusIo, BusResult, SerialIo};
