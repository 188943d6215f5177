//! Sandboxed expression evaluation for EvalNode.
//!
//! Expressions are compiled in expression-only mode on a raw Rhai engine:
//! no statements, loops, assignments or closures, and only the operator
//! packages plus a fixed list of math functions are registered.
//!
//! ## Bindings
//!
//! - `v` - map of the node's input variables (`v["T1"]` or `v.T1`)
//! - `c` - map of configured constants
//!
//! ## Functions
//!
//! `abs sqrt exp ln log10 floor ceil round sin cos tan` (one argument) and
//! `min max pow` (two arguments).
//!
//! ## Example
//!
//! ```rhai
//! (v.P_in - v.P_out) * c.conductance
//! ```

mod engine;

pub use engine::ExpressionEngine;

use rhai::AST;

/// A compiled expression, ready to evaluate repeatedly.
#[derive(Clone)]
pub struct CompiledExpression {
    ast: AST,
    source: String,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .finish()
    }
}
