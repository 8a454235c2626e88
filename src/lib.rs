//! Core library for the slowmon slow-control monitor.
//!
//! This library polls laboratory instruments (Pfeiffer vacuum gauges and
//! turbo pumps, a Keithley-style current meter) over shared RS-485/RS-232
//! serial buses, decodes the vendor wire protocols into normalized readings,
//! and forwards them to a time-series sink.

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod poll;
pub mod protocol;
pub mod reading;
pub mod recovery;
pub mod sink;
