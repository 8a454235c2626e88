//! Time-series sink boundary.
//!
//! The poll loop only depends on [`ReadingSink`]; the shipped implementation
//! writes InfluxDB 2.x line protocol. A reading is submitted as
//! `sensor_data,device=<name>,unit=<unit> <field>=<value> <timestamp>` —
//! and never without a value.

use async_trait::async_trait;
use chrono::Utc;
use influxdb2::Client;
use log::debug;
use std::sync::{Arc, Mutex};

use crate::error::{AppResult, MonitorError};
use crate::reading::Reading;

/// Measurement name all readings are filed under.
const MEASUREMENT: &str = "sensor_data";

/// Consumer of normalized readings.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// Record one reading. Valueless readings are silently skipped.
    async fn record(&self, reading: &Reading) -> AppResult<()>;
}

/// InfluxDB 2.x sink.
pub struct InfluxSink {
    client: Client,
    org: String,
    bucket: String,
}

impl InfluxSink {
    /// Build a client for the given server/org/bucket.
    pub fn new(url: &str, org: &str, bucket: &str, token: &str) -> Self {
        Self {
            client: Client::new(url, org, token),
            org: org.to_string(),
            bucket: bucket.to_string(),
        }
    }

    /// Health check against the server; fatal at startup if it fails.
    pub async fn ping(&self) -> AppResult<()> {
        self.client
            .health()
            .await
            .map_err(|e| MonitorError::Sink(format!("health check failed: {e}")))?;
        Ok(())
    }

    fn line_protocol(reading: &Reading, value: f64, timestamp_ns: i64) -> String {
        format!(
            "{},device={},unit={} {}={} {}",
            MEASUREMENT,
            escape_tag(&reading.device),
            escape_tag(&reading.unit),
            escape_tag(&reading.field),
            value,
            timestamp_ns
        )
    }
}

#[async_trait]
impl ReadingSink for InfluxSink {
    async fn record(&self, reading: &Reading) -> AppResult<()> {
        let Some(value) = reading.value else {
            return Ok(());
        };
        let timestamp_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let line = Self::line_protocol(reading, value, timestamp_ns);
        debug!("Influx write: {}", line);
        self.client
            .write_line_protocol(&self.org, &self.bucket, line)
            .await
            .map_err(|e| MonitorError::Sink(e.to_string()))
    }
}

/// Escape an InfluxDB tag value or field key.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// In-memory sink for tests.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Reading>>>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn records(&self) -> Vec<Reading> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ReadingSink for MemorySink {
    async fn record(&self, reading: &Reading) -> AppResult<()> {
        if reading.value.is_some() {
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(reading.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::ReadStatus;

    #[test]
    fn line_protocol_escapes_tags() {
        let reading = Reading::ok("Target chamber vacuum gauge", "pressure", "mbar", 1e-6);
        let line = InfluxSink::line_protocol(&reading, 1e-6, 1_700_000_000_000_000_000);
        assert_eq!(
            line,
            "sensor_data,device=Target\\ chamber\\ vacuum\\ gauge,unit=mbar \
             pressure=0.000001 1700000000000000000"
        );
    }

    #[tokio::test]
    async fn memory_sink_skips_valueless_readings() {
        let sink = MemorySink::new();
        sink.record(&Reading::ok("gauge", "pressure", "mbar", 2.0))
            .await
            .unwrap();
        sink.record(&Reading::without_value(
            "gauge",
            "pressure",
            "mbar",
            ReadStatus::Timeout,
        ))
        .await
        .unwrap();
        assert_eq!(sink.records().len(), 1);
    }
}
