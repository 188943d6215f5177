use super::compiled_plan::{CompiledPlan, PlanStats};
use super::id::NodeId;
use super::node::Node;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Splits a built graph into subpipelines.
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Compile a pipeline graph into an execution plan.
    ///
    /// Nodes are grouped by connected-component search, treating upstream and
    /// downstream links as one undirected adjacency. Each component is then
    /// ordered with Kahn's algorithm; ties go to the earlier-built node, so
    /// the order is deterministic and matches build order where it can.
    ///
    /// # Arguments
    /// * `nodes` - All nodes, indexed by `NodeId`, with links wired
    ///
    /// # Returns
    /// A `CompiledPlan` with one topologically ordered list per component
    pub fn compile(nodes: &[Node]) -> CompiledPlan {
        let start_time = std::time::Instant::now();

        let n = nodes.len();
        if n == 0 {
            return CompiledPlan::new();
        }

        let components = Self::connected_components(nodes);

        let subpipelines: Vec<Vec<NodeId>> = components
            .iter()
            .map(|members| Self::topological_sort(nodes, members))
            .collect();

        let compile_time_us = start_time.elapsed().as_micros() as u64;

        let stats = PlanStats {
            total_nodes: n,
            source_nodes: nodes.iter().filter(|node| node.upstream.is_empty()).count(),
            sink_nodes: nodes.iter().filter(|node| node.downstream.is_empty()).count(),
            largest_subpipeline: subpipelines.iter().map(Vec::len).max().unwrap_or(0),
            compile_time_us,
        };

        CompiledPlan {
            subpipelines,
            stats,
        }
    }

    /// Group nodes into components using DFS over the undirected graph.
    fn connected_components(nodes: &[Node]) -> Vec<Vec<usize>> {
        let n = nodes.len();
        let mut component = vec![usize::MAX; n];
        let mut components = Vec::new();

        for start in 0..n {
            if component[start] != usize::MAX {
                continue;
            }
            let id = components.len();
            let mut members = Vec::new();
            let mut stack = vec![start];
            component[start] = id;

            while let Some(node) = stack.pop() {
                members.push(node);
                let neighbors = nodes[node].upstream.iter().chain(&nodes[node].downstream);
                for neighbor in neighbors {
                    let idx = neighbor.index();
                    if idx < n && component[idx] == usize::MAX {
                        component[idx] = id;
                        stack.push(idx);
                    }
                }
            }

            members.sort_unstable();
            components.push(members);
        }

        components
    }

    /// Kahn's algorithm over one component, smallest ready index first.
    fn topological_sort(nodes: &[Node], members: &[usize]) -> Vec<NodeId> {
        let n = nodes.len();
        let mut in_degree = vec![0usize; n];
        for &idx in members {
            in_degree[idx] = nodes[idx].upstream.len();
        }

        let mut ready: BinaryHeap<Reverse<usize>> = members
            .iter()
            .filter(|&&idx| in_degree[idx] == 0)
            .map(|&idx| Reverse(idx))
            .collect();
        let mut result = Vec::with_capacity(members.len());

        while let Some(Reverse(node)) = ready.pop() {
            result.push(NodeId::from(node));

            for next in &nodes[node].downstream {
                let idx = next.index();
                in_degree[idx] -= 1;
                if in_degree[idx] == 0 {
                    ready.push(Reverse(idx));
                }
            }
        }

        if result.len() != members.len() {
            // The builder rejects cycles, so this only fires on hand-wired graphs
            tracing::warn!(
                "Subpipeline has a cycle! Only {} of {} nodes scheduled.",
                result.len(),
                members.len()
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::builder::NodeSpec;
    use crate::pipeline::node_type::NodeType;
    use serde_json::json;

    /// Nodes wired from `(name, upstream)` pairs listed in build order.
    fn graph(edges: &[(&str, &[&str])]) -> Vec<Node> {
        let mut nodes: Vec<Node> = edges
            .iter()
            .map(|(name, upstream)| {
                let spec: NodeSpec = serde_json::from_value(json!({
                    "name": name, "type": "PolynomialNode", "upstream": upstream
                }))
                .unwrap();
                Node::new(&spec, NodeType::PolynomialNode.instantiate())
            })
            .collect();
        for i in 0..nodes.len() {
            let ups: Vec<NodeId> = nodes[i]
                .upstream_names
                .clone()
                .iter()
                .map(|u| NodeId::from(edges.iter().position(|(n, _)| n == u).unwrap()))
                .collect();
            for up in &ups {
                nodes[up.index()].downstream.push(NodeId::from(i));
            }
            nodes[i].upstream = ups;
        }
        nodes
    }

    #[test]
    fn test_two_disjoint_groups() {
        let nodes = graph(&[
            ("a", &[]),
            ("x", &[]),
            ("b", &["a"]),
            ("y", &["x"]),
            ("c", &["b"]),
        ]);
        let plan = PipelineCompiler::compile(&nodes);
        assert_eq!(plan.subpipelines.len(), 2);
        assert_eq!(plan.subpipelines[0], vec![NodeId(0), NodeId(2), NodeId(4)]);
        assert_eq!(plan.subpipelines[1], vec![NodeId(1), NodeId(3)]);
        assert_eq!(plan.stats.source_nodes, 2);
        assert_eq!(plan.stats.sink_nodes, 2);
        assert_eq!(plan.stats.largest_subpipeline, 3);
    }

    #[test]
    fn test_diamond_is_one_ordered_component() {
        // Diamond: a → b, a → c, b → d, c → d
        let nodes = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let plan = PipelineCompiler::compile(&nodes);
        assert_eq!(plan.subpipelines.len(), 1);

        let order = &plan.subpipelines[0];
        let pos = |i: u32| order.iter().position(|&x| x == NodeId(i)).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn test_merge_joins_components() {
        // two sources merged into one sink form a single subpipeline
        let nodes = graph(&[("s1", &[]), ("s2", &[]), ("m", &["s1", "s2"])]);
        let plan = PipelineCompiler::compile(&nodes);
        assert_eq!(plan.subpipelines, vec![vec![NodeId(0), NodeId(1), NodeId(2)]]);
        assert_eq!(plan.subpipeline_of(NodeId(2)), Some(0));
    }

    #[test]
    fn test_empty_graph() {
        let plan = PipelineCompiler::compile(&[]);
        assert!(plan.is_empty());
        assert_eq!(plan.stats, PlanStats::default());
    }
}
