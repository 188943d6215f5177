//! DerivativeNode: least-squares slope of `input_var` against time.

use super::{default_true, series};
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::node::{parse_config, ConfigMap, Intake, NodeContext, NodeOutput, NodePlugin};
use crate::pipeline::packet::{Package, Value};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct DerivativeConfig {
    input_var: String,
    length: usize,
    #[serde(default = "default_true")]
    strict: bool,
}

#[derive(Debug)]
pub struct DerivativeNode {
    input_var: String,
    length: usize,
    strict: bool,
}

impl DerivativeNode {
    pub fn new() -> Self {
        Self {
            input_var: String::new(),
            length: 2,
            strict: true,
        }
    }
}

impl Default for DerivativeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Closed-form linear-fit slope. Times are shifted by their minimum first;
/// epoch-sized timestamps would otherwise cancel out in the sums.
pub fn slope(t: &[f64], v: &[f64]) -> NodeResult<f64> {
    let n = t.len();
    if n < 2 {
        return Err(NodeError::NotEnoughSamples { need: 2, have: n });
    }
    let t0 = t.iter().copied().fold(f64::INFINITY, f64::min);
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
    for (&ti, &vi) in t.iter().zip(v) {
        let x = ti - t0;
        sx += x;
        sy += vi;
        sxx += x * x;
        sxy += x * vi;
    }
    let n = n as f64;
    let denom = n * sxx - sx * sx;
    if denom == 0.0 {
        return Err(NodeError::Degenerate("all samples share one timestamp".to_string()));
    }
    Ok((n * sxy - sx * sy) / denom)
}

impl NodePlugin for DerivativeNode {
    fn intake(&self) -> Intake {
        Intake::Window {
            strict: self.strict,
        }
    }

    fn buffer_length(&self) -> usize {
        self.length
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: DerivativeConfig = parse_config(config)?;
        if cfg.length < 2 {
            return Err("length must be at least 2".to_string());
        }
        self.input_var = cfg.input_var;
        self.length = cfg.length;
        self.strict = cfg.strict;
        Ok(())
    }

    fn process(&mut self, input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let (t, v) = series(input, &self.input_var)?;
        Ok(NodeOutput::Value(Value::Float(slope(&t, &v)?)))
    }
}
