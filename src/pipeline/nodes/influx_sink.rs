//! InfluxSinkNode: writes a value to telemetry under a sensor's name.
//!
//! The measurement is named after `output_var` (falling back to
//! `input_var`); its topic, device and subsystem come from that sensor's
//! settings when it has any, or from the node config otherwise.

use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::node::{
    parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin, NodeSetup,
};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::Package;
use crate::telemetry::Telemetry;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SinkConfig {
    input_var: String,
    #[serde(default)]
    output_var: Option<String>,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    device: String,
    #[serde(default)]
    subsystem: String,
}

#[derive(Debug, Default, Clone)]
struct SinkTarget {
    topic: String,
    device: String,
    subsystem: String,
}

#[derive(Default)]
pub struct InfluxSinkNode {
    input_var: String,
    sensor: String,
    /// Resolved from the sensor settings at setup; wins over config.
    resolved: Option<SinkTarget>,
    configured: SinkTarget,
    telemetry: Option<Arc<dyn Telemetry>>,
}

impl InfluxSinkNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn target(&self) -> &SinkTarget {
        match &self.resolved {
            Some(t) if !t.topic.is_empty() => t,
            _ => &self.configured,
        }
    }
}

impl NodePlugin for InfluxSinkNode {
    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.telemetry = Some(setup.collaborators.telemetry.clone());
        let sensor = setup.output_var.or(setup.input_var).unwrap_or_default();
        self.resolved = setup.sensor(sensor).map(|doc| SinkTarget {
            topic: doc.topic.clone(),
            device: doc.device.clone(),
            subsystem: doc.subsystem.clone(),
        });
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: SinkConfig = parse_config(config)?;
        self.sensor = cfg.output_var.unwrap_or_else(|| cfg.input_var.clone());
        self.input_var = cfg.input_var;
        self.configured = SinkTarget {
            topic: cfg.topic,
            device: cfg.device,
            subsystem: cfg.subsystem,
        };
        if self.target().topic.is_empty() {
            return Err(format!("no topic known for '{}'", self.sensor));
        }
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let package = latest(input)?;
        let value = package.get_f64(&self.input_var)?;
        if ctx.silence.is_silent {
            tracing::trace!("{}: silent, not writing {}", ctx.pipeline, self.sensor);
            return Ok(NodeOutput::Passthrough);
        }

        let target = self.target();
        let mut tags = BTreeMap::new();
        tags.insert("sensor".to_string(), self.sensor.clone());
        tags.insert("pipeline".to_string(), ctx.pipeline.to_string());
        if !target.device.is_empty() {
            tags.insert("device".to_string(), target.device.clone());
        }
        if !target.subsystem.is_empty() {
            tags.insert("subsystem".to_string(), target.subsystem.clone());
        }
        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), value);

        let telemetry = self
            .telemetry
            .as_ref()
            .ok_or_else(|| NodeError::Other("telemetry not set up".to_string()))?;
        telemetry.write_to_influx(&target.topic, &tags, &fields, Some(package.time))?;
        Ok(NodeOutput::Passthrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::node::SilenceState;
    use crate::pipeline::nodes::testing::{config, Harness};
    use crate::store::SensorDoc;
    use serde_json::json;

    #[test]
    fn test_writes_under_output_sensor() {
        let mut h = Harness::new();
        let mut out_doc = SensorDoc::new("T1_avg");
        out_doc.topic = "temperature".to_string();
        out_doc.device = "virtual".to_string();
        h.sensors.insert("T1_avg".to_string(), out_doc);
        h.output_var = Some("T1_avg".to_string());

        let mut node = InfluxSinkNode::new();
        h.setup(&mut node, 1);
        node.load_config(&config(json!({"input_var": "T1", "output_var": "T1_avg"})))
            .unwrap();
        h.process(&mut node, &[Package::new(5.0).with("T1", 1.25)])
            .unwrap();

        let points = h.telemetry.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].topic, "temperature");
        assert_eq!(points[0].tags["sensor"], "T1_avg");
        assert_eq!(points[0].tags["device"], "virtual");
        assert_eq!(points[0].fields["value"], 1.25);
        assert_eq!(points[0].timestamp, Some(5.0));
    }

    #[test]
    fn test_silent_pipeline_does_not_write() {
        let mut h = Harness::new();
        h.silence = SilenceState::fully_silent();
        let mut node = InfluxSinkNode::new();
        h.setup(&mut node, 1);
        node.load_config(&config(json!({"input_var": "x", "topic": "misc"})))
            .unwrap();
        h.process(&mut node, &[Package::new(1.0).with("x", 1.0)])
            .unwrap();
        assert!(h.telemetry.points().is_empty());
    }

    #[test]
    fn test_topic_required() {
        let mut node = InfluxSinkNode::new();
        assert!(node.load_config(&config(json!({"input_var": "x"}))).is_err());
    }
}
