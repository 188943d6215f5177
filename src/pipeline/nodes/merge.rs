//! MergeNode: joins one package from each upstream node.
//!
//! The buffer holds exactly one slot per upstream node and is cleared after
//! every merge. Keys present in every input are combined with `merge_how`;
//! other keys pass through, later packages winning. The output time is
//! always the mean input time.

use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{
    parse_config, ConfigMap, Intake, NodeContext, NodeOutput, NodePlugin, NodeSetup,
};
use crate::pipeline::packet::{Package, Value};
use serde::Deserialize;
use std::collections::BTreeSet;

/// How keys common to all inputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeHow {
    #[default]
    Avg,
    Min,
    Max,
    Sum,
    First,
    Last,
}

impl MergeHow {
    fn combine(self, values: &[f64]) -> f64 {
        match self {
            MergeHow::Avg => values.iter().sum::<f64>() / values.len() as f64,
            MergeHow::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            MergeHow::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            MergeHow::Sum => values.iter().sum(),
            MergeHow::First => values[0],
            MergeHow::Last => values[values.len() - 1],
        }
    }
}

#[derive(Debug, Deserialize)]
struct MergeConfig {
    #[serde(default)]
    merge_how: MergeHow,
}

#[derive(Debug)]
pub struct MergeNode {
    inputs: usize,
    merge_how: MergeHow,
}

impl MergeNode {
    pub fn new() -> Self {
        Self {
            inputs: 1,
            merge_how: MergeHow::Avg,
        }
    }
}

impl Default for MergeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge a non-empty set of packages.
pub fn merge_packages(packages: &[Package], how: MergeHow) -> Package {
    let n = packages.len().max(1) as f64;
    let time = packages.iter().map(|p| p.time).sum::<f64>() / n;

    let mut common: BTreeSet<&str> = packages
        .first()
        .map(|p| p.keys().collect())
        .unwrap_or_default();
    for package in packages.iter().skip(1) {
        common.retain(|k| package.contains_key(k));
    }

    let mut merged = Package::new(time);
    for package in packages {
        for (key, value) in package.iter() {
            if !common.contains(key) {
                merged.insert(key, value);
            }
        }
    }
    for key in common {
        let values: Option<Vec<f64>> = packages
            .iter()
            .map(|p| p.get(key).and_then(|v| v.as_f64()))
            .collect();
        let value = match values {
            Some(values) => Value::Float(how.combine(&values)),
            None => packages
                .last()
                .and_then(|p| p.get(key))
                .unwrap_or(Value::Null),
        };
        merged.insert(key, value);
    }
    merged
}

impl NodePlugin for MergeNode {
    fn intake(&self) -> Intake {
        Intake::Drain
    }

    fn buffer_length(&self) -> usize {
        self.inputs
    }

    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.inputs = setup.upstream_count.max(1);
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: MergeConfig = parse_config(config)?;
        self.merge_how = cfg.merge_how;
        Ok(())
    }

    fn process(&mut self, input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        Ok(NodeOutput::Package(merge_packages(input, self.merge_how)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::testing::{config, Harness};
    use serde_json::json;

    fn inputs() -> Vec<Package> {
        vec![
            Package::new(0.0).with("a", 1.0).with("x", 1.0),
            Package::new(2.0).with("a", 3.0).with("y", 1.0),
        ]
    }

    #[test]
    fn test_average_merge() {
        let mut h = Harness::new();
        let mut node = MergeNode::new();
        h.setup(&mut node, 2);
        node.load_config(&config(json!({}))).unwrap();
        assert_eq!(node.buffer_length(), 2);

        let out = h.process(&mut node, &inputs()).unwrap();
        let expected = Package::new(1.0)
            .with("a", 2.0)
            .with("x", 1.0)
            .with("y", 1.0);
        assert_eq!(out, NodeOutput::Package(expected));
    }

    #[test]
    fn test_merge_how_variants() {
        let pk = inputs();
        assert_eq!(merge_packages(&pk, MergeHow::Max).get_f64("a").unwrap(), 3.0);
        assert_eq!(merge_packages(&pk, MergeHow::Min).get_f64("a").unwrap(), 1.0);
        assert_eq!(merge_packages(&pk, MergeHow::Sum).get_f64("a").unwrap(), 4.0);
        assert_eq!(merge_packages(&pk, MergeHow::First).get_f64("a").unwrap(), 1.0);
        assert_eq!(merge_packages(&pk, MergeHow::Last).get_f64("a").unwrap(), 3.0);
        // time is the mean regardless
        assert_eq!(merge_packages(&pk, MergeHow::Max).time, 1.0);
    }

    #[test]
    fn test_null_common_key_takes_last() {
        let pk = vec![
            Package::new(0.0).with("a", Value::Null),
            Package::new(1.0).with("a", 5.0),
        ];
        assert_eq!(merge_packages(&pk, MergeHow::Avg).get("a"), Some(Value::Float(5.0)));
    }

    #[test]
    fn test_unknown_merge_how_rejected() {
        let mut node = MergeNode::new();
        assert!(node.load_config(&config(json!({"merge_how": "median"}))).is_err());
    }
}
