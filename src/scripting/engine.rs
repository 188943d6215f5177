//! Expression engine implementation.

use crate::error::{DobermanError, Result};
use crate::scripting::CompiledExpression;
use rhai::packages::{ArithmeticPackage, LogicPackage, Package};
use rhai::{Dynamic, Engine, Map, Scope};
use std::collections::BTreeMap;

/// Sandboxed evaluator for single arithmetic/boolean expressions.
pub struct ExpressionEngine {
    engine: Engine,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new_raw();
        Self::configure_engine(&mut engine);
        Self { engine }
    }

    /// Operators plus the allow-listed math functions, under tight limits.
    fn configure_engine(engine: &mut Engine) {
        engine.set_max_expr_depths(32, 32);
        engine.set_max_call_levels(8);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(256);
        engine.set_max_array_size(64);
        engine.set_max_map_size(256);
        engine.set_allow_anonymous_fn(false);

        engine.register_global_module(ArithmeticPackage::new().as_shared_module());
        engine.register_global_module(LogicPackage::new().as_shared_module());

        register_unary(engine, "abs", f64::abs);
        register_unary(engine, "sqrt", f64::sqrt);
        register_unary(engine, "exp", f64::exp);
        register_unary(engine, "ln", f64::ln);
        register_unary(engine, "log10", f64::log10);
        register_unary(engine, "floor", f64::floor);
        register_unary(engine, "ceil", f64::ceil);
        register_unary(engine, "round", f64::round);
        register_unary(engine, "sin", f64::sin);
        register_unary(engine, "cos", f64::cos);
        register_unary(engine, "tan", f64::tan);

        register_binary(engine, "min", f64::min);
        register_binary(engine, "max", f64::max);
        register_binary(engine, "pow", f64::powf);
    }

    /// Compile `source` as a single expression. Statements, loops,
    /// assignments and closures are rejected here.
    pub fn compile(&self, source: &str) -> Result<CompiledExpression> {
        let ast = self
            .engine
            .compile_expression(source)
            .map_err(|e| DobermanError::Script(format!("Compilation error: {}", e)))?;
        Ok(CompiledExpression {
            ast,
            source: source.to_string(),
        })
    }

    /// Evaluate with inputs bound as map `v` and constants as map `c`.
    /// Booleans come back as 1.0 / 0.0.
    pub fn evaluate(
        &self,
        expr: &CompiledExpression,
        inputs: &BTreeMap<String, f64>,
        constants: &BTreeMap<String, f64>,
    ) -> Result<f64> {
        let mut scope = Scope::new();
        scope.push_constant("v", to_map(inputs));
        scope.push_constant("c", to_map(constants));

        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, &expr.ast)
            .map_err(|e| DobermanError::Script(format!("Evaluating '{}': {}", expr.source, e)))?;

        if let Ok(f) = result.as_float() {
            Ok(f)
        } else if let Ok(i) = result.as_int() {
            Ok(i as f64)
        } else if let Ok(b) = result.as_bool() {
            Ok(if b { 1.0 } else { 0.0 })
        } else {
            Err(DobermanError::Script(format!(
                "Expression '{}' returned {}, expected a number",
                expr.source,
                result.type_name()
            )))
        }
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn to_map(values: &BTreeMap<String, f64>) -> Map {
    values
        .iter()
        .map(|(k, v)| (k.as_str().into(), Dynamic::from_float(*v)))
        .collect()
}

// Integer literals in expressions (`pow(x, 2)`) need their own overloads.
fn register_unary(engine: &mut Engine, name: &str, f: fn(f64) -> f64) {
    engine.register_fn(name, move |x: f64| f(x));
    engine.register_fn(name, move |x: i64| f(x as f64));
}

fn register_binary(engine: &mut Engine, name: &str, f: fn(f64, f64) -> f64) {
    engine.register_fn(name, move |a: f64, b: f64| f(a, b));
    engine.register_fn(name, move |a: f64, b: i64| f(a, b as f64));
    engine.register_fn(name, move |a: i64, b: f64| f(a as f64, b));
    engine.register_fn(name, move |a: i64, b: i64| f(a as f64, b as f64));
}
