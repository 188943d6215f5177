//! ValveControlNode: hysteresis valve with an open-time limit.
//!
//! The valve opens when the input falls below `low` and closes once it
//! rises above `high`. If it has been open longer than `max_open_time`
//! seconds it is forced shut and stays shut until the input recovers to
//! `low` or above, so a stuck level sensor cannot keep it open forever.

use super::{ControlOutput, OutputConfig};
use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin, NodeSetup};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::Package;
use serde::Deserialize;

fn one() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct ValveConfig {
    input_var: String,
    low: f64,
    high: f64,
    #[serde(default)]
    max_open_time: Option<f64>,
    #[serde(default = "one")]
    open_output: f64,
    #[serde(default)]
    closed_output: f64,
    #[serde(flatten)]
    output: OutputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValveState {
    Closed,
    Open { since: f64 },
    /// Forced shut by the open-time limit.
    TimedOut,
}

pub struct ValveControlNode {
    input_var: String,
    low: f64,
    high: f64,
    max_open_time: Option<f64>,
    open_output: f64,
    closed_output: f64,
    state: ValveState,
    output: ControlOutput,
}

impl ValveControlNode {
    pub fn new() -> Self {
        Self {
            input_var: String::new(),
            low: 0.0,
            high: 0.0,
            max_open_time: None,
            open_output: 1.0,
            closed_output: 0.0,
            state: ValveState::Closed,
            output: ControlOutput::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ValveState::Open { .. })
    }

    fn next_state(&self, value: f64, now: f64) -> ValveState {
        match self.state {
            ValveState::Closed if value < self.low => ValveState::Open { since: now },
            ValveState::Open { .. } if value > self.high => ValveState::Closed,
            ValveState::Open { since } => match self.max_open_time {
                Some(limit) if now - since > limit => ValveState::TimedOut,
                _ => self.state,
            },
            ValveState::TimedOut if value >= self.low => ValveState::Closed,
            state => state,
        }
    }
}

impl Default for ValveControlNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for ValveControlNode {
    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.output.setup(setup);
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: ValveConfig = parse_config(config)?;
        if cfg.low >= cfg.high {
            return Err(format!("low {} must be below high {}", cfg.low, cfg.high));
        }
        self.input_var = cfg.input_var;
        self.low = cfg.low;
        self.high = cfg.high;
        self.max_open_time = cfg.max_open_time;
        self.open_output = cfg.open_output;
        self.closed_output = cfg.closed_output;
        self.output.configure(cfg.output);
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let value = latest(input)?.get_f64(&self.input_var)?;
        let next = self.next_state(value, ctx.now);
        if next == ValveState::TimedOut && self.state != next {
            tracing::warn!(
                "{}: valve open longer than {:?} s, forcing it shut",
                ctx.pipeline,
                self.max_open_time
            );
        }
        self.state = next;
        let target = if self.is_open() {
            self.open_output
        } else {
            self.closed_output
        };
        self.output.set_output(target, ctx)?;
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

    fn valve(h: &Harness) -> ValveControlNode {
        let mut node = ValveControlNode::new();
        h.setup(&mut node, 1);
        node.load_config(&config(json!({
            "input_var": "level",
            "low": 20,
            "high": 80,
            "max_open_time": 60,
            "control_target": "ln2_valve",
            "control_value": "state"
        })))
        .unwrap();
        node
    }

    fn feed(h: &mut Harness, node: &mut ValveControlNode, now: f64, level: f64) {
        h.now = now;
        h.process(node, &[Package::new(now).with("level", level)])
            .unwrap();
    }

    #[test]
    fn test_hysteresis() {
        let mut h = Harness::new();
        let mut node = valve(&h);
        feed(&mut h, &mut node, 0.0, 50.0);
        assert!(!node.is_open());
        feed(&mut h, &mut node, 1.0, 10.0);
        assert!(node.is_open());
        feed(&mut h, &mut node, 2.0, 50.0);
        assert!(node.is_open());
        feed(&mut h, &mut node, 3.0, 90.0);
        assert!(!node.is_open());

        let sent: Vec<String> = h.store.commands().into_iter().map(|c| c.command).collect();
        assert_eq!(sent, vec!["set state 0", "set state 1", "set state 0"]);
    }

    #[test]
    fn test_max_open_time_forces_close_until_recovered() {
        let mut h = Harness::new();
        let mut node = valve(&h);
        feed(&mut h, &mut node, 0.0, 10.0);
        assert!(node.is_open());
        feed(&mut h, &mut node, 61.0, 10.0);
        assert!(!node.is_open());
        // still low: stays shut
        feed(&mut h, &mut node, 62.0, 10.0);
        assert!(!node.is_open());
        feed(&mut h, &mut node, 63.0, 30.0);
        feed(&mut h, &mut node, 64.0, 10.0);
        assert!(node.is_open());
    }

    #[test]
    fn test_thresholds_validated() {
        let mut node = ValveControlNode::new();
        let cfg = config(json!({
            "input_var": "level", "low": 80, "high": 20,
            "control_target": "v", "control_value": "state"
        }));
        assert!(node.load_config(&cfg).is_err());
    }
}
