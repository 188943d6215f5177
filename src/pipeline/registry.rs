//! Node registry: turns a spec's `type` name into a node.
//!
//! Built-in names resolve through [`NodeType`]. Plugin constructors can be
//! registered for device-specific node types; a plugin may not shadow a
//! built-in name.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{AnyNode, NodePlugin};
use crate::pipeline::node_type::NodeType;
use std::collections::HashMap;
use std::fmt;

type PluginConstructor = Box<dyn Fn() -> Box<dyn NodePlugin> + Send + Sync>;

#[derive(Default)]
pub struct NodeRegistry {
    plugins: HashMap<String, PluginConstructor>,
}

impl NodeRegistry {
    /// Registry that knows the built-in node types only.
    pub fn with_builtins() -> Self {
        Self::default()
    }

    /// Register a plugin node type.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> PipelineResult<()>
    where
        F: Fn() -> Box<dyn NodePlugin> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.parse::<NodeType>().is_ok() || self.plugins.contains_key(&name) {
            return Err(PipelineError::DuplicateNode(name));
        }
        tracing::debug!("Registered plugin node type '{}'", name);
        self.plugins.insert(name, Box::new(constructor));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        name.parse::<NodeType>().is_ok() || self.plugins.contains_key(name)
    }

    /// Create an unconfigured node for `name`.
    pub fn create(&self, name: &str) -> PipelineResult<AnyNode> {
        if let Ok(node_type) = name.parse::<NodeType>() {
            return Ok(node_type.instantiate());
        }
        self.plugins
            .get(name)
            .map(|constructor| AnyNode::Plugin(constructor()))
            .ok_or_else(|| PipelineError::UnknownNodeType(name.to_string()))
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.plugins.keys().collect();
        names.sort();
        f.debug_struct("NodeRegistry").field("plugins", &names).finish()
    }
}
