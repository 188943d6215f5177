//! PolynomialNode: Σ aᵢ·xⁱ with little-endian coefficients.

use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::{Package, Value};
use serde::Deserialize;

fn identity() -> Vec<f64> {
    vec![0.0, 1.0]
}

#[derive(Debug, Deserialize)]
struct PolynomialConfig {
    input_var: String,
    #[serde(default = "identity")]
    transform: Vec<f64>,
}

#[derive(Debug)]
pub struct PolynomialNode {
    input_var: String,
    transform: Vec<f64>,
}

impl PolynomialNode {
    pub fn new() -> Self {
        Self {
            input_var: String::new(),
            transform: identity(),
        }
    }
}

impl Default for PolynomialNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Horner evaluation of `coeffs[0] + coeffs[1]·x + ...`.
pub fn evaluate(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, a| acc * x + a)
}

impl NodePlugin for PolynomialNode {
    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: PolynomialConfig = parse_config(config)?;
        self.input_var = cfg.input_var;
        self.transform = cfg.transform;
        Ok(())
    }

    fn process(&mut self, input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let x = latest(input)?.get_f64(&self.input_var)?;
        Ok(NodeOutput::Value(Value::Float(evaluate(&self.transform, x))))
    }
}
