//! AnalogControlNode: forwards its input, clamped, as a setpoint.

use super::{ControlOutput, OutputConfig};
use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin, NodeSetup};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::Package;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AnalogConfig {
    input_var: String,
    #[serde(default)]
    min_output: Option<f64>,
    #[serde(default)]
    max_output: Option<f64>,
    #[serde(flatten)]
    output: OutputConfig,
}

/// Clamp to optional bounds.
pub(crate) fn clamp(value: f64, min: Option<f64>, max: Option<f64>) -> f64 {
    let value = min.map_or(value, |lo| value.max(lo));
    max.map_or(value, |hi| value.min(hi))
}

#[derive(Default)]
pub struct AnalogControlNode {
    input_var: String,
    min_output: Option<f64>,
    max_output: Option<f64>,
    output: ControlOutput,
}

impl AnalogControlNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodePlugin for AnalogControlNode {
    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.output.setup(setup);
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: AnalogConfig = parse_config(config)?;
        if let (Some(lo), Some(hi)) = (cfg.min_output, cfg.max_output) {
            if lo > hi {
                return Err(format!("min_output {} exceeds max_output {}", lo, hi));
            }
        }
        self.input_var = cfg.input_var;
        self.min_output = cfg.min_output;
        self.max_output = cfg.max_output;
        self.output.configure(cfg.output);
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let value = latest(input)?.get_f64(&self.input_var)?;
        let value = clamp(value, self.min_output, self.max_output);
        self.output.set_output(value, ctx)?;
        Ok(NodeOutput::Passthrough)
    }

    fn on_error_do_this(&mut self, ctx: &mut NodeContext) {
        self.output.fail_safe(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::testing::{config, Harness};
    use serde_json::json;

    #[test]
    fn test_clamps_to_limits() {
        let mut h = Harness::new();
        let mut node = AnalogControlNode::new();
        h.setup(&mut node, 1);
        node.load_config(&config(json!({
            "input_var": "sp",
            "control_target": "flow_ctrl",
            "control_value": "setpoint",
            "min_output": 0,
            "max_output": 50
        })))
        .unwrap();
        h.process(&mut node, &[Package::new(1.0).with("sp", 75.0)])
            .unwrap();
        h.process(&mut node, &[Package::new(2.0).with("sp", -3.0)])
            .unwrap();
        let sent: Vec<String> = h.store.commands().into_iter().map(|c| c.command).collect();
        assert_eq!(sent, vec!["set setpoint 50", "set setpoint 0"]);
    }

    #[test]
    fn test_clamp_without_bounds() {
        assert_eq!(clamp(3.5, None, None), 3.5);
        assert_eq!(clamp(3.5, Some(4.0), None), 4.0);
        assert_eq!(clamp(3.5, None, Some(1.0)), 1.0);
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let mut node = AnalogControlNode::new();
        let cfg = config(json!({
            "input_var": "sp",
            "control_target": "t",
            "control_value": "v",
            "min_output": 5,
            "max_output": 1
        }));
        assert!(node.load_config(&cfg).is_err());
    }
}
