//! Test data builders for pipeline documents and sensors

use doberman::store::{PipelineDoc, SensorDoc};
use doberman::PipelineStatus;
use serde_json::{json, Value};

/// Builder for pipeline documents
pub struct PipelineDocBuilder {
    name: String,
    status: PipelineStatus,
    nodes: Vec<Value>,
    depends_on: Vec<String>,
    node_config: serde_json::Map<String, Value>,
}

impl PipelineDocBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: PipelineStatus::Active,
            nodes: Vec::new(),
            depends_on: Vec::new(),
            node_config: serde_json::Map::new(),
        }
    }

    pub fn status(mut self, status: PipelineStatus) -> Self {
        self.status = status;
        self
    }

    /// Add a node spec; `extra` holds the variant-specific keys.
    pub fn node(mut self, name: &str, node_type: &str, upstream: &[&str], extra: Value) -> Self {
        let mut spec = json!({"name": name, "type": node_type, "upstream": upstream});
        if let (Some(spec), Value::Object(extra)) = (spec.as_object_mut(), extra) {
            spec.extend(extra);
        }
        self.nodes.push(spec);
        self
    }

    /// Shorthand for a listening source node.
    pub fn source(self, name: &str, var: &str) -> Self {
        self.node(name, "SensorSourceNode", &[], json!({"input_var": var}))
    }

    pub fn depends_on(mut self, sensor: &str) -> Self {
        self.depends_on.push(sensor.to_string());
        self
    }

    pub fn node_config(mut self, section: &str, config: Value) -> Self {
        self.node_config.insert(section.to_string(), config);
        self
    }

    pub fn build(self) -> PipelineDoc {
        let mut doc = PipelineDoc::new(self.name);
        doc.status = self.status;
        doc.pipeline = serde_json::from_value(Value::Array(self.nodes)).unwrap();
        doc.depends_on = self.depends_on;
        doc.node_config = self.node_config;
        doc
    }
}

/// Builder for sensor settings
pub struct SensorBuilder {
    doc: SensorDoc,
}

impl SensorBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            doc: SensorDoc::new(name),
        }
    }

    pub fn readout_interval(mut self, seconds: f64) -> Self {
        self.doc.readout_interval = seconds;
        self
    }

    pub fn thresholds(mut self, low: f64, high: f64) -> Self {
        self.doc.alarm_thresholds = Some([low, high]);
        self
    }

    pub fn recurrence(mut self, count: usize) -> Self {
        self.doc.alarm_recurrence = Some(count);
        self
    }

    pub fn alarm_level(mut self, level: i64) -> Self {
        self.doc.alarm_level = Some(level);
        self
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.doc.topic = topic.to_string();
        self
    }

    pub fn build(self) -> SensorDoc {
        self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_doc_builder() {
        let doc = PipelineDocBuilder::new("alarm_t")
            .source("src", "T1")
            .node("chk", "SimpleAlarmNode", &["src"], json!({"input_var": "T1"}))
            .depends_on("T1")
            .build();

        assert_eq!(doc.pipeline.len(), 2);
        assert_eq!(doc.pipeline[1].upstream, vec!["src".to_string()]);
        assert_eq!(doc.depends_on, vec!["T1".to_string()]);
    }
}
