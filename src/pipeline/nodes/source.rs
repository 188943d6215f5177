//! Source nodes: the entry points of a pipeline.
//!
//! `SensorSourceNode` is fed by externally injected `sensor_value` commands
//! and is what makes a pipeline event-driven. `InfluxSourceNode` reads the
//! most recent value of its sensor from telemetry every cycle.

use crate::pipeline::buffer::TimeBuffer;
use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{
    parse_config, ConfigMap, Intake, Listen, NodeContext, NodeOutput, NodePlugin, NodeSetup,
};
use crate::pipeline::packet::Package;
use crate::telemetry::Telemetry;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SourceConfig {
    input_var: String,
    #[serde(default)]
    topic: String,
}

/// Source fed by injected sensor values.
#[derive(Debug, Default)]
pub struct SensorSourceNode {
    input_var: String,
}

impl SensorSourceNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_var(&self) -> &str {
        &self.input_var
    }
}

impl NodePlugin for SensorSourceNode {
    fn intake(&self) -> Intake {
        Intake::Source
    }

    fn listen(&self) -> Listen {
        Listen::Required
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: SourceConfig = parse_config(config)?;
        self.input_var = cfg.input_var;
        Ok(())
    }

    fn process(&mut self, _input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        Ok(NodeOutput::Passthrough)
    }
}

/// Source reading the latest telemetry value of `input_var`.
#[derive(Default)]
pub struct InfluxSourceNode {
    input_var: String,
    topic: String,
    telemetry: Option<Arc<dyn Telemetry>>,
}

impl InfluxSourceNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodePlugin for InfluxSourceNode {
    fn intake(&self) -> Intake {
        Intake::Source
    }

    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.telemetry = Some(setup.collaborators.telemetry.clone());
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: SourceConfig = parse_config(config)?;
        if cfg.topic.is_empty() {
            return Err(format!("no topic known for sensor '{}'", cfg.input_var));
        }
        self.input_var = cfg.input_var;
        self.topic = cfg.topic;
        Ok(())
    }

    fn read_source(&mut self, _buffer: &mut TimeBuffer, _ctx: &mut NodeContext) -> NodeResult<Package> {
        let telemetry = self.telemetry.as_ref().ok_or_else(|| {
            crate::pipeline::error::NodeError::Other("telemetry not set up".to_string())
        })?;
        let (time, value) = telemetry.read_latest(&self.topic, &self.input_var)?;
        Ok(Package::new(time).with(self.input_var.as_str(), value))
    }

    fn process(&mut self, _input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        Ok(NodeOutput::Passthrough)
    }
}
