//! DigitalControlNode: maps a truthy input to one of two outputs.

use super::{ControlOutput, OutputConfig};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::node::{parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin, NodeSetup};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::Package;
use serde::Deserialize;

fn one() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct DigitalConfig {
    input_var: String,
    #[serde(default = "one")]
    one_output: f64,
    #[serde(default)]
    zero_output: f64,
    #[serde(flatten)]
    output: OutputConfig,
}

#[derive(Default)]
pub struct DigitalControlNode {
    input_var: String,
    one_output: f64,
    zero_output: f64,
    output: ControlOutput,
}

impl DigitalControlNode {
    pub fn new() -> Self {
        Self {
            one_output: 1.0,
            ..Self::default()
        }
    }
}

impl NodePlugin for DigitalControlNode {
    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.output.setup(setup);
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: DigitalConfig = parse_config(config)?;
        self.input_var = cfg.input_var;
        self.one_output = cfg.one_output;
        self.zero_output = cfg.zero_output;
        self.output.configure(cfg.output);
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let package = latest(input)?;
        let state = package
            .get(&self.input_var)
            .ok_or_else(|| NodeError::MissingVariable(self.input_var.clone()))?;
        let value = if state.is_truthy() {
            self.one_output
        } else {
            self.zero_output
        };
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
    fn test_switches_on_change_only() {
        let mut h = Harness::new();
        let mut node = DigitalControlNode::new();
        h.setup(&mut node, 1);
        node.load_config(&config(json!({
            "input_var": "too_cold",
            "control_target": "heater_psu",
            "control_value": "output",
            "default_output": 0
        })))
        .unwrap();

        for (t, v) in [(1.0, 1.0), (2.0, 1.0), (3.0, 0.0)] {
            h.process(&mut node, &[Package::new(t).with("too_cold", v)])
                .unwrap();
        }
        let sent: Vec<String> = h.store.commands().into_iter().map(|c| c.command).collect();
        assert_eq!(sent, vec!["set output 1", "set output 0"]);
    }

    #[test]
    fn test_error_hook_sends_default() {
        let mut h = Harness::new();
        let mut node = DigitalControlNode::new();
        h.setup(&mut node, 1);
        node.load_config(&config(json!({
            "input_var": "x",
            "control_target": "valve",
            "control_value": "state",
            "default_output": 0
        })))
        .unwrap();
        let mut ctx = h.ctx();
        node.on_error_do_this(&mut ctx);
        let commands = h.store.commands();
        assert_eq!(commands[0].to, "valve");
        assert_eq!(commands[0].command, "set state 0");
    }

    #[test]
    fn test_target_required() {
        let mut node = DigitalControlNode::new();
        assert!(node.load_config(&config(json!({"input_var": "x"}))).is_err());
    }
}
