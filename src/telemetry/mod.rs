//! Time-series telemetry boundary.
//!
//! Sink nodes write measurements through [`Telemetry::write_to_influx`];
//! source nodes ask for the most recent value of a sensor. The HTTP
//! transport to the time-series database lives behind this trait.

use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("No data for '{sensor}' in '{topic}'")]
    NoData { topic: String, sensor: String },

    #[error("Telemetry unavailable: {0}")]
    Unavailable(String),
}

/// A single written measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub topic: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub timestamp: Option<f64>,
}

#[cfg_attr(test, mockall::automock)]
pub trait Telemetry: Send + Sync {
    fn write_to_influx(
        &self,
        topic: &str,
        tags: &BTreeMap<String, String>,
        fields: &BTreeMap<String, f64>,
        timestamp: Option<f64>,
    ) -> Result<(), TelemetryError>;

    /// Most recent `(timestamp, value)` of `sensor` in `topic`.
    fn read_latest(&self, topic: &str, sensor: &str) -> Result<(f64, f64), TelemetryError>;
}

/// Telemetry kept in memory. Reads see everything written before.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    points: Mutex<Vec<Point>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading the way a device readout would.
    pub fn push_reading(&self, topic: &str, sensor: &str, timestamp: f64, value: f64) {
        let mut tags = BTreeMap::new();
        tags.insert("sensor".to_string(), sensor.to_string());
        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), value);
        self.lock().push(Point {
            topic: topic.to_string(),
            tags,
            fields,
            timestamp: Some(timestamp),
        });
    }

    pub fn points(&self) -> Vec<Point> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Point>> {
        self.points.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Telemetry for MemoryTelemetry {
    fn write_to_influx(
        &self,
        topic: &str,
        tags: &BTreeMap<String, String>,
        fields: &BTreeMap<String, f64>,
        timestamp: Option<f64>,
    ) -> Result<(), TelemetryError> {
        self.lock().push(Point {
            topic: topic.to_string(),
            tags: tags.clone(),
            fields: fields.clone(),
            timestamp,
        });
        Ok(())
    }

    fn read_latest(&self, topic: &str, sensor: &str) -> Result<(f64, f64), TelemetryError> {
        self.lock()
            .iter()
            .filter(|p| p.topic == topic && p.tags.get("sensor").map(String::as_str) == Some(sensor))
            .filter_map(|p| Some((p.timestamp?, *p.fields.get("value")?)))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .ok_or_else(|| TelemetryError::NoData {
                topic: topic.to_string(),
                sensor: sensor.to_string(),
            })
    }
}
