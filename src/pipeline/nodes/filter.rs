//! LowPassFilterNode: median over the buffered window.

use super::{default_true, series};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::node::{parse_config, ConfigMap, Intake, NodeContext, NodeOutput, NodePlugin};
use crate::pipeline::packet::{Package, Value};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FilterConfig {
    input_var: String,
    length: usize,
    #[serde(default = "default_true")]
    strict: bool,
}

/// Median filter. An even window averages the two central values.
#[derive(Debug)]
pub struct LowPassFilterNode {
    input_var: String,
    length: usize,
    strict: bool,
}

impl LowPassFilterNode {
    pub fn new() -> Self {
        Self {
            input_var: String::new(),
            length: 1,
            strict: true,
        }
    }
}

impl Default for LowPassFilterNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Median of `values`; for an even count, the mean of the two central ones.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some(0.5 * (values[mid - 1] + values[mid]))
    }
}

impl NodePlugin for LowPassFilterNode {
    fn intake(&self) -> Intake {
        Intake::Window {
            strict: self.strict,
        }
    }

    fn buffer_length(&self) -> usize {
        self.length
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: FilterConfig = parse_config(config)?;
        if cfg.length == 0 {
            return Err("length must be at least 1".to_string());
        }
        self.input_var = cfg.input_var;
        self.length = cfg.length;
        self.strict = cfg.strict;
        Ok(())
    }

    fn process(&mut self, input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let (_, mut values) = series(input, &self.input_var)?;
        let m = median(&mut values).ok_or(NodeError::EmptyBuffer)?;
        Ok(NodeOutput::Value(Value::Float(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::testing::{config, samples, Harness};
    use serde_json::json;

    fn filter(length: usize) -> LowPassFilterNode {
        let mut node = LowPassFilterNode::new();
        node.load_config(&config(json!({"input_var": "x", "length": length})))
            .unwrap();
        node
    }

    #[test]
    fn test_odd_window() {
        let mut h = Harness::new();
        let mut node = filter(3);
        let out = h
            .process(&mut node, &samples("x", &[(0.0, 3.0), (1.0, 1.0), (2.0, 2.0)]))
            .unwrap();
        assert_eq!(out, NodeOutput::Value(Value::Float(2.0)));
    }

    #[test]
    fn test_even_window() {
        let mut h = Harness::new();
        let mut node = filter(4);
        let out = h
            .process(
                &mut node,
                &samples("x", &[(0.0, 1.0), (1.0, 2.0), (2.0, 3.0), (3.0, 4.0)]),
            )
            .unwrap();
        assert_eq!(out, NodeOutput::Value(Value::Float(2.5)));
    }

    #[test]
    fn test_config_controls_window() {
        let node = filter(7);
        assert_eq!(node.buffer_length(), 7);
        assert_eq!(node.intake(), Intake::Window { strict: true });
        let mut bad = LowPassFilterNode::new();
        assert!(bad.load_config(&config(json!({"input_var": "x"}))).is_err());
    }
}
