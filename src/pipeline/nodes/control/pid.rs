//! PIDControlNode: proportional-integral-derivative loop.
//!
//! `dt` is taken from consecutive package times, so irregular cycles do not
//! distort the integral or derivative terms. The integral is clamped to
//! `±integral_limit` to bound windup.

use super::analog::clamp;
use super::{ControlOutput, OutputConfig};
use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin, NodeSetup};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::Package;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PidConfig {
    input_var: String,
    setpoint: f64,
    kp: f64,
    #[serde(default)]
    ki: f64,
    #[serde(default)]
    kd: f64,
    #[serde(default)]
    min_output: Option<f64>,
    #[serde(default)]
    max_output: Option<f64>,
    #[serde(default)]
    integral_limit: Option<f64>,
    #[serde(flatten)]
    output: OutputConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Gains {
    kp: f64,
    ki: f64,
    kd: f64,
}

#[derive(Default)]
pub struct PidControlNode {
    input_var: String,
    setpoint: f64,
    gains: Gains,
    min_output: Option<f64>,
    max_output: Option<f64>,
    integral_limit: Option<f64>,
    integral: f64,
    /// Error and time of the previous sample.
    previous: Option<(f64, f64)>,
    output: ControlOutput,
}

impl PidControlNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the loop by one sample and return the clamped output.
    fn step(&mut self, time: f64, measured: f64) -> f64 {
        let error = self.setpoint - measured;
        let mut derivative = 0.0;
        if let Some((last_error, last_time)) = self.previous {
            let dt = time - last_time;
            if dt > 0.0 {
                self.integral += error * dt;
                if let Some(limit) = self.integral_limit {
                    self.integral = self.integral.clamp(-limit.abs(), limit.abs());
                }
                derivative = (error - last_error) / dt;
            }
        }
        self.previous = Some((error, time));

        let Gains { kp, ki, kd } = self.gains;
        let raw = kp * error + ki * self.integral + kd * derivative;
        clamp(raw, self.min_output, self.max_output)
    }
}

impl NodePlugin for PidControlNode {
    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.output.setup(setup);
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: PidConfig = parse_config(config)?;
        let gains = Gains {
            kp: cfg.kp,
            ki: cfg.ki,
            kd: cfg.kd,
        };
        self.input_var = cfg.input_var;
        self.setpoint = cfg.setpoint;
        self.gains = gains;
        self.min_output = cfg.min_output;
        self.max_output = cfg.max_output;
        self.integral_limit = cfg.integral_limit;
        self.output.configure(cfg.output);
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let package = latest(input)?;
        let measured = package.get_f64(&self.input_var)?;
        let value = self.step(package.time, measured);
        self.output.set_output(value, ctx)?;
        Ok(NodeOutput::Passthrough)
    }

    fn on_error_do_this(&mut self, ctx: &mut NodeContext) {
        self.integral = 0.0;
        self.previous = None;
        self.output.fail_safe(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::testing::{config, Harness};
    use serde_json::json;

    fn pid(h: &Harness, extra: serde_json::Value) -> PidControlNode {
        let mut cfg = config(json!({
            "input_var": "T",
            "setpoint": 10,
            "kp": 1,
            "ki": 0.5,
            "control_target": "heater",
            "control_value": "power"
        }));
        cfg.extend(config(extra));
        let mut node = PidControlNode::new();
        h.setup(&mut node, 1);
        node.load_config(&cfg).unwrap();
        node
    }

    #[test]
    fn test_proportional_then_integral() {
        let mut h = Harness::new();
        let mut node = pid(&h, json!({}));
        h.process(&mut node, &[Package::new(0.0).with("T", 8.0)])
            .unwrap();
        h.process(&mut node, &[Package::new(2.0).with("T", 6.0)])
            .unwrap();
        let sent: Vec<String> = h.store.commands().into_iter().map(|c| c.command).collect();
        assert_eq!(sent, vec!["set power 2", "set power 8"]);
    }

    #[test]
    fn test_integral_windup_is_clamped() {
        let h = Harness::new();
        let mut node = pid(&h, json!({"integral_limit": 1.0}));
        assert_eq!(node.step(0.0, 8.0), 2.0);
        assert_eq!(node.step(2.0, 6.0), 4.5);
    }

    #[test]
    fn test_derivative_and_output_limits() {
        let h = Harness::new();
        let mut node = pid(&h, json!({"ki": 0, "kd": 2, "max_output": 3}));
        assert_eq!(node.step(0.0, 10.0), 0.0);
        // error 0 -> 4 over 1 s: 4 + 2 * 4 = 12, limited to 3
        assert_eq!(node.step(1.0, 6.0), 3.0);
    }

    #[test]
    fn test_error_hook_resets_integrator() {
        let mut h = Harness::new();
        let mut node = pid(&h, json!({"default_output": 0}));
        node.step(0.0, 8.0);
        node.step(2.0, 6.0);
        let mut ctx = h.ctx();
        node.on_error_do_this(&mut ctx);
        assert_eq!(node.integral, 0.0);
        assert!(node.previous.is_none());
    }
}
