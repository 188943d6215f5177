//! Compiled execution plan for a pipeline graph.

use crate::pipeline::id::NodeId;

/// Independent, internally ordered groups of nodes.
#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    /// One entry per connected component, each in topological order.
    pub subpipelines: Vec<Vec<NodeId>>,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Total number of nodes in the graph
    pub total_nodes: usize,

    /// Number of source nodes (no upstream)
    pub source_nodes: usize,

    /// Number of sink nodes (no downstream)
    pub sink_nodes: usize,

    /// Size of the largest subpipeline
    pub largest_subpipeline: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the plan has any nodes
    pub fn is_empty(&self) -> bool {
        self.subpipelines.iter().all(Vec::is_empty)
    }

    /// Subpipeline containing `node`, if any.
    pub fn subpipeline_of(&self, node: NodeId) -> Option<usize> {
        self.subpipelines.iter().position(|s| s.contains(&node))
    }
}
