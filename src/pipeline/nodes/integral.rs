//! IntegralNode: trapezoidal time integral over the window, divided by the
//! covered time span (a time-weighted mean).

use super::{default_true, series};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::node::{parse_config, ConfigMap, Intake, NodeContext, NodeOutput, NodePlugin};
use crate::pipeline::packet::{Package, Value};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct IntegralConfig {
    input_var: String,
    length: usize,
    #[serde(default = "default_true")]
    strict: bool,
    /// Most recent samples left out of the integral.
    #[serde(default)]
    t_offset: usize,
}

#[derive(Debug)]
pub struct IntegralNode {
    input_var: String,
    length: usize,
    strict: bool,
    t_offset: usize,
}

impl IntegralNode {
    pub fn new() -> Self {
        Self {
            input_var: String::new(),
            length: 1,
            strict: true,
            t_offset: 0,
        }
    }
}

impl Default for IntegralNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Trapezoid rule over `(t, v)` normalized by `t[last] - t[0]`.
pub fn normalized_integral(t: &[f64], v: &[f64]) -> NodeResult<f64> {
    if t.len() < 2 {
        return Err(NodeError::NotEnoughSamples {
            need: 2,
            have: t.len(),
        });
    }
    let span = t[t.len() - 1] - t[0];
    if span <= 0.0 {
        return Err(NodeError::Degenerate("zero time span".to_string()));
    }
    let area: f64 = t
        .windows(2)
        .zip(v.windows(2))
        .map(|(tw, vw)| (tw[1] - tw[0]) * (vw[0] + vw[1]) * 0.5)
        .sum();
    Ok(area / span)
}

impl NodePlugin for IntegralNode {
    fn intake(&self) -> Intake {
        Intake::Window {
            strict: self.strict,
        }
    }

    fn buffer_length(&self) -> usize {
        self.length
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: IntegralConfig = parse_config(config)?;
        if cfg.length < 2 {
            return Err("length must be at least 2".to_string());
        }
        self.input_var = cfg.input_var;
        self.length = cfg.length;
        self.strict = cfg.strict;
        self.t_offset = cfg.t_offset;
        Ok(())
    }

    fn process(&mut self, input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let (t, v) = series(input, &self.input_var)?;
        let end = t.len().saturating_sub(self.t_offset);
        let result = normalized_integral(&t[..end], &v[..end])?;
        Ok(NodeOutput::Value(Value::Float(result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::testing::{config, samples, Harness};
    use serde_json::json;

    fn integral(extra: serde_json::Value) -> IntegralNode {
        let mut cfg = config(json!({"input_var": "x", "length": 3}));
        cfg.extend(config(extra));
        let mut node = IntegralNode::new();
        node.load_config(&cfg).unwrap();
        node
    }

    #[test]
    fn test_linear_ramp_gives_mean() {
        let mut h = Harness::new();
        let mut node = integral(json!({}));
        let out = h
            .process(&mut node, &samples("x", &[(0.0, 0.0), (1.0, 2.0), (2.0, 4.0)]))
            .unwrap();
        assert_eq!(out, NodeOutput::Value(Value::Float(2.0)));
    }

    #[test]
    fn test_t_offset_excludes_latest() {
        let mut h = Harness::new();
        let mut node = integral(json!({"t_offset": 1}));
        let out = h
            .process(&mut node, &samples("x", &[(0.0, 0.0), (1.0, 2.0), (2.0, 100.0)]))
            .unwrap();
        assert_eq!(out, NodeOutput::Value(Value::Float(1.0)));
    }

    #[test]
    fn test_offset_too_large() {
        let mut h = Harness::new();
        let mut node = integral(json!({"t_offset": 2}));
        let err = h
            .process(&mut node, &samples("x", &[(0.0, 0.0), (1.0, 2.0), (2.0, 4.0)]))
            .unwrap_err();
        assert!(matches!(err, NodeError::NotEnoughSamples { .. }));
    }

    #[test]
    fn test_zero_span() {
        assert!(matches!(
            normalized_integral(&[1.0, 1.0], &[1.0, 2.0]),
            Err(NodeError::Degenerate(_))
        ));
    }
}
