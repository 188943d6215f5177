//! In-memory document store.
//!
//! Documents are held as JSON behind a `RwLock`, so `set_pipeline_value` can
//! write arbitrary top-level fields the same way a document database would.
//! The whole store can be loaded from and flushed back to a JSON file.

use super::{
    AlarmMessage, AlarmSink, CommandDoc, DeliveryError, PipelineDoc, SensorDoc, Store, StoreError,
    StoreResult,
};
use crate::types::{now_secs, Flavor, PipelineStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Serializable contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub pipelines: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorDoc>,
    #[serde(default)]
    pub experiment_config: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub commands: Vec<CommandDoc>,
    #[serde(default)]
    pub alarms: Vec<AlarmMessage>,
    #[serde(default)]
    pub heartbeats: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: StoreData) -> Self {
        Self {
            data: RwLock::new(data),
            path: None,
        }
    }

    /// Load a store from a JSON file; `flush` writes back to the same file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let data: StoreData = serde_json::from_str(&content)?;
        tracing::info!(
            "Loaded store from {:?}: {} pipelines, {} sensors",
            path,
            data.pipelines.len(),
            data.sensors.len()
        );
        Ok(Self {
            data: RwLock::new(data),
            path: Some(path.to_path_buf()),
        })
    }

    /// Keep `flush` from writing back to the loaded file.
    pub fn read_only(mut self) -> Self {
        self.path = None;
        self
    }

    /// Write the store to `path` as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(&*self.read())?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn insert_pipeline(&self, doc: PipelineDoc) -> StoreResult<()> {
        let value = serde_json::to_value(&doc)?;
        self.write().pipelines.insert(doc.name.clone(), value);
        Ok(())
    }

    pub fn insert_sensor(&self, doc: SensorDoc) {
        self.write().sensors.insert(doc.name.clone(), doc);
    }

    pub fn set_experiment_config(&self, name: &str, value: JsonValue) {
        self.write()
            .experiment_config
            .insert(name.to_string(), value);
    }

    /// Commands logged so far, oldest first.
    pub fn commands(&self) -> Vec<CommandDoc> {
        self.read().commands.clone()
    }

    /// Alarms logged so far, oldest first.
    pub fn alarms(&self) -> Vec<AlarmMessage> {
        self.read().alarms.clone()
    }

    pub fn heartbeat(&self, monitor: &str) -> Option<f64> {
        self.read().heartbeats.get(monitor).copied()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreData> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreData> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    fn get_pipeline(&self, name: &str) -> StoreResult<PipelineDoc> {
        let data = self.read();
        let value = data
            .pipelines
            .get(name)
            .ok_or_else(|| StoreError::not_found("pipeline", name))?;
        let mut doc: PipelineDoc = serde_json::from_value(value.clone())?;
        doc.name = name.to_string();
        Ok(doc)
    }

    fn set_pipeline_value(&self, name: &str, values: &[(String, JsonValue)]) -> StoreResult<()> {
        let mut data = self.write();
        let doc = data
            .pipelines
            .get_mut(name)
            .and_then(|v| v.as_object_mut())
            .ok_or_else(|| StoreError::not_found("pipeline", name))?;
        for (key, value) in values {
            doc.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn get_pipelines(
        &self,
        flavor: Flavor,
        statuses: &[PipelineStatus],
    ) -> StoreResult<Vec<String>> {
        let data = self.read();
        let mut names = Vec::new();
        for (name, value) in &data.pipelines {
            if Flavor::of_pipeline(name) != Some(flavor) {
                continue;
            }
            let status: PipelineStatus = value
                .get("status")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            if statuses.contains(&status) {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    fn get_sensor_setting(&self, name: &str) -> StoreResult<SensorDoc> {
        self.read()
            .sensors
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("sensor", name))
    }

    fn get_experiment_config(&self, name: &str) -> StoreResult<JsonValue> {
        self.read()
            .experiment_config
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("experiment config", name))
    }

    fn log_command(
        &self,
        command: &str,
        to: &str,
        issuer: &str,
        delay: Option<f64>,
        bypass_hypervisor: bool,
    ) -> StoreResult<()> {
        tracing::debug!("Command '{}' to {} from {}", command, to, issuer);
        self.write().commands.push(CommandDoc {
            command: command.to_string(),
            to: to.to_string(),
            issuer: issuer.to_string(),
            delay,
            bypass_hypervisor,
            logged: now_secs(),
        });
        Ok(())
    }

    fn update_heartbeat(&self, monitor: &str) -> StoreResult<()> {
        self.write()
            .heartbeats
            .insert(monitor.to_string(), now_secs());
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        match &self.path {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }
}

impl AlarmSink for MemoryStore {
    fn log_alarm(&self, alarm: &AlarmMessage) -> Result<(), DeliveryError> {
        tracing::warn!(
            "ALARM level {} from {}: {} ({})",
            alarm.level,
            alarm.pipeline,
            alarm.message,
            alarm.hash
        );
        self.write().alarms.push(alarm.clone());
        Ok(())
    }
}
