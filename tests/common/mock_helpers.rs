//! Collaborator helpers: in-memory stores and scripted alarm sinks

use doberman::pipeline::{Collaborators, NodeRegistry, Pipeline, PipelineBuilder};
use doberman::store::{AlarmMessage, AlarmSink, DeliveryError, MemoryStore, PipelineDoc};
use doberman::telemetry::MemoryTelemetry;
use std::sync::{Arc, Mutex};

/// Alarm sink that fails every delivery and remembers the attempts
#[derive(Default)]
pub struct FailingSink {
    attempts: Mutex<Vec<AlarmMessage>>,
}

impl FailingSink {
    pub fn attempts(&self) -> Vec<AlarmMessage> {
        self.attempts.lock().unwrap().clone()
    }
}

impl AlarmSink for FailingSink {
    fn log_alarm(&self, alarm: &AlarmMessage) -> Result<(), DeliveryError> {
        self.attempts.lock().unwrap().push(alarm.clone());
        Err(DeliveryError("SMTP relay unreachable".to_string()))
    }
}

/// Store, telemetry and alarm sink wired together for one test
pub struct TestWorld {
    pub store: Arc<MemoryStore>,
    pub telemetry: Arc<MemoryTelemetry>,
    pub alarms: Arc<dyn AlarmSink>,
}

impl TestWorld {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            alarms: store.clone(),
            store,
            telemetry: Arc::new(MemoryTelemetry::new()),
        }
    }

    pub fn with_alarm_sink(mut self, sink: Arc<dyn AlarmSink>) -> Self {
        self.alarms = sink;
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            telemetry: self.telemetry.clone(),
            alarms: self.alarms.clone(),
        }
    }

    /// Store `doc` and build it with the built-in node types.
    pub fn build(&self, doc: PipelineDoc) -> Pipeline {
        self.store.insert_pipeline(doc.clone()).unwrap();
        let registry = NodeRegistry::with_builtins();
        PipelineBuilder::new(&registry, self.collaborators())
            .build(doc)
            .unwrap()
    }
}
