//! Persistent document store boundary.
//!
//! The pipeline engine never talks to a database directly. Everything it needs
//! (pipeline documents, sensor settings, experiment-wide alarm tables, the
//! command queue and the alarm log) goes through the [`Store`] and
//! [`AlarmSink`] traits. [`MemoryStore`] backs the binary and the tests.

pub mod memory;

pub use memory::{MemoryStore, StoreData};

use crate::pipeline::builder::NodeSpec;
use crate::types::{Flavor, PipelineStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{collection} '{name}' not found")]
    NotFound { collection: String, name: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(collection: &str, name: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            name: name.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Build the field list for [`Store::set_pipeline_value`].
pub fn fields<const N: usize>(values: [(&str, JsonValue); N]) -> Vec<(String, JsonValue)> {
    values
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn neg_one_f() -> f64 {
    -1.0
}

fn neg_one_i() -> i64 {
    -1
}

/// A pipeline definition plus its persisted runtime fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDoc {
    pub name: String,

    #[serde(default)]
    pub status: PipelineStatus,

    /// Node specifications, in any order.
    #[serde(default)]
    pub pipeline: Vec<NodeSpec>,

    /// Runtime node configuration: a `general` section plus per-node overrides.
    #[serde(default)]
    pub node_config: Map<String, JsonValue>,

    /// External inputs (sensor names) this pipeline reads.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Expiry of an automatic silence, or -1 when none is pending.
    #[serde(default = "neg_one_f")]
    pub silent_until: f64,

    /// Alarms at or below this level are suppressed while silent.
    #[serde(default = "neg_one_i")]
    pub silenced_at_level: i64,

    #[serde(default)]
    pub cycles: u64,

    /// Cycle index of the most recent node failure, or -1.
    #[serde(default = "neg_one_i")]
    pub error: i64,

    #[serde(default)]
    pub heartbeat: Option<f64>,

    /// Total node processing time of the last cycle, in milliseconds.
    #[serde(default)]
    pub rate: f64,
}

impl PipelineDoc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PipelineStatus::default(),
            pipeline: Vec::new(),
            node_config: Map::new(),
            depends_on: Vec::new(),
            silent_until: neg_one_f(),
            silenced_at_level: neg_one_i(),
            cycles: 0,
            error: neg_one_i(),
            heartbeat: None,
            rate: 0.0,
        }
    }
}

fn default_readout_interval() -> f64 {
    1.0
}

/// Per-sensor settings that nodes read through their `input_var`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDoc {
    pub name: String,

    /// Seconds between readings.
    #[serde(default = "default_readout_interval")]
    pub readout_interval: f64,

    #[serde(default)]
    pub alarm_thresholds: Option<[f64; 2]>,

    /// Consecutive out-of-range readings required before alarming.
    #[serde(default)]
    pub alarm_recurrence: Option<usize>,

    #[serde(default)]
    pub alarm_level: Option<i64>,

    /// Integer or bitmask alarm tables.
    #[serde(default)]
    pub alarm_values: Option<JsonValue>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub device: String,

    #[serde(default)]
    pub topic: String,

    #[serde(default)]
    pub subsystem: String,

    #[serde(default)]
    pub units: String,
}

impl SensorDoc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readout_interval: default_readout_interval(),
            alarm_thresholds: None,
            alarm_recurrence: None,
            alarm_level: None,
            alarm_values: None,
            description: String::new(),
            device: String::new(),
            topic: String::new(),
            subsystem: String::new(),
            units: String::new(),
        }
    }
}

/// A queued command for a device or another monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDoc {
    pub command: String,
    pub to: String,
    pub issuer: String,
    #[serde(default)]
    pub delay: Option<f64>,
    #[serde(default)]
    pub bypass_hypervisor: bool,
    pub logged: f64,
}

/// One alarm message handed to the delivery system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmMessage {
    pub level: i64,
    pub message: String,
    pub pipeline: String,
    pub hash: String,
    pub timestamp: f64,
}

#[derive(Error, Debug, Clone)]
#[error("Alarm delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Document store consumed by the pipeline engine and monitors.
#[cfg_attr(test, mockall::automock)]
pub trait Store: Send + Sync {
    fn get_pipeline(&self, name: &str) -> StoreResult<PipelineDoc>;

    /// Set top-level fields of a pipeline document.
    fn set_pipeline_value(&self, name: &str, values: &[(String, JsonValue)]) -> StoreResult<()>;

    /// Names of pipelines of one flavor whose status is in `statuses`.
    fn get_pipelines(&self, flavor: Flavor, statuses: &[PipelineStatus])
        -> StoreResult<Vec<String>>;

    fn get_sensor_setting(&self, name: &str) -> StoreResult<SensorDoc>;

    /// Experiment-wide config section.
    fn get_experiment_config(&self, name: &str) -> StoreResult<JsonValue>;

    /// One field of an experiment-wide config section.
    fn get_experiment_field(&self, name: &str, field: &str) -> StoreResult<JsonValue> {
        let section = self.get_experiment_config(name)?;
        section
            .get(field)
            .cloned()
            .ok_or_else(|| StoreError::not_found(name, field))
    }

    fn log_command(
        &self,
        command: &str,
        to: &str,
        issuer: &str,
        delay: Option<f64>,
        bypass_hypervisor: bool,
    ) -> StoreResult<()>;

    fn update_heartbeat(&self, monitor: &str) -> StoreResult<()>;

    /// Push buffered writes to durable storage.
    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Alarm message delivery (email/SMS/phone routing happens behind this).
#[cfg_attr(test, mockall::automock)]
pub trait AlarmSink: Send + Sync {
    fn log_alarm(&self, alarm: &AlarmMessage) -> Result<(), DeliveryError>;
}
