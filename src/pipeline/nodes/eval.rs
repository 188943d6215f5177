//! EvalNode: evaluates a configured expression over named inputs.
//!
//! `input_var` may be a single name or a list. Each input is bound in map
//! `v`, configured `constants` in map `c`:
//!
//! ```json
//! {"name": "dp", "type": "EvalNode", "upstream": ["src"],
//!  "input_var": ["P_in", "P_out"], "output_var": "dP",
//!  "operation": "(v.P_in - v.P_out) * c.scale", "constants": {"scale": 1e3}}
//! ```

use crate::pipeline::builder::VarList;
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::node::{parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::{Package, Value};
use crate::scripting::{CompiledExpression, ExpressionEngine};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct EvalConfig {
    input_var: VarList,
    operation: String,
    #[serde(default)]
    constants: BTreeMap<String, f64>,
}

pub struct EvalNode {
    engine: ExpressionEngine,
    expression: Option<CompiledExpression>,
    inputs: Vec<String>,
    constants: BTreeMap<String, f64>,
}

impl EvalNode {
    pub fn new() -> Self {
        Self {
            engine: ExpressionEngine::new(),
            expression: None,
            inputs: Vec::new(),
            constants: BTreeMap::new(),
        }
    }
}

impl Default for EvalNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for EvalNode {
    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: EvalConfig = parse_config(config)?;
        let unchanged = self
            .expression
            .as_ref()
            .is_some_and(|e| e.source() == cfg.operation);
        if !unchanged {
            let compiled = self.engine.compile(&cfg.operation).map_err(|e| e.to_string())?;
            self.expression = Some(compiled);
        }
        self.inputs = cfg.input_var.to_vec();
        self.constants = cfg.constants;
        Ok(())
    }

    fn process(&mut self, input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let expression = self
            .expression
            .as_ref()
            .ok_or_else(|| NodeError::Expression("no operation configured".to_string()))?;
        let package = latest(input)?;
        let mut values = BTreeMap::new();
        for name in &self.inputs {
            values.insert(name.clone(), package.get_f64(name)?);
        }
        let result = self
            .engine
            .evaluate(expression, &values, &self.constants)
            .map_err(|e| NodeError::Expression(e.to_string()))?;
        Ok(NodeOutput::Value(Value::Float(result)))
    }
}
