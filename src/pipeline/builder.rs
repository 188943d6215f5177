//! Graph builder: turns a pipeline document into a runnable [`Pipeline`].
//!
//! Build order follows dependencies: a spec is built once every name in
//! its `upstream` list has been built. A pass that builds nothing while
//! specs remain means a cycle or a missing node, and the whole build fails
//! with the built and unbuilt names.
//!
//! After construction the builder wires downstream links, resolves sensor
//! settings, calls `setup` on every node, splits the graph into
//! subpipelines and runs one configuration pass so a bad config fails the
//! build instead of the first cycle.

use crate::config::PipelineSettings;
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::executor::Pipeline;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{sensor_overlay, Collaborators, ConfigMap, Node, NodeSetup};
use crate::pipeline::nodes::alarm::AlarmSettings;
use crate::pipeline::registry::NodeRegistry;
use crate::store::{PipelineDoc, SensorDoc, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

/// One or several variable names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarList {
    One(String),
    Many(Vec<String>),
}

impl VarList {
    pub fn first(&self) -> Option<&str> {
        match self {
            VarList::One(name) => Some(name),
            VarList::Many(names) => names.first().map(String::as_str),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            VarList::One(name) => vec![name.clone()],
            VarList::Many(names) => names.clone(),
        }
    }
}

/// Declarative description of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_var: Option<VarList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_var: Option<String>,
    /// Variant-specific keys, passed through to the node's config.
    #[serde(flatten)]
    pub extra: ConfigMap,
}

impl NodeSpec {
    /// Spec keys as the base layer of a config overlay.
    pub fn to_config(&self) -> ConfigMap {
        let mut config = self.extra.clone();
        if let Some(input_var) = &self.input_var {
            if let Ok(value) = serde_json::to_value(input_var) {
                config.insert("input_var".to_string(), value);
            }
        }
        if let Some(output_var) = &self.output_var {
            config.insert("output_var".to_string(), JsonValue::String(output_var.clone()));
        }
        config
    }

    /// Variable names this node reads or writes.
    fn variables(&self) -> Vec<String> {
        let mut names = self.input_var.as_ref().map(VarList::to_vec).unwrap_or_default();
        names.extend(self.output_var.iter().cloned());
        names
    }
}

/// Order specs so that every spec follows all of its upstream specs.
pub fn build_order(specs: &[NodeSpec]) -> PipelineResult<Vec<&NodeSpec>> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(PipelineError::DuplicateNode(spec.name.clone()));
        }
    }

    let mut built: Vec<&NodeSpec> = Vec::with_capacity(specs.len());
    let mut built_names: HashSet<&str> = HashSet::new();
    let mut unbuilt: Vec<&NodeSpec> = specs.iter().collect();

    while !unbuilt.is_empty() {
        let before = unbuilt.len();
        let mut remaining = Vec::with_capacity(unbuilt.len());
        for spec in unbuilt {
            if spec.upstream.iter().all(|u| built_names.contains(u.as_str())) {
                built_names.insert(&spec.name);
                built.push(spec);
            } else {
                remaining.push(spec);
            }
        }
        if remaining.len() == before {
            return Err(PipelineError::Build {
                built: built.iter().map(|s| s.name.clone()).collect(),
                unbuilt: remaining.iter().map(|s| s.name.clone()).collect(),
            });
        }
        unbuilt = remaining;
    }
    Ok(built)
}

/// Builds pipelines from their documents.
pub struct PipelineBuilder<'a> {
    registry: &'a NodeRegistry,
    collaborators: Collaborators,
    settings: PipelineSettings,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(registry: &'a NodeRegistry, collaborators: Collaborators) -> Self {
        Self {
            registry,
            collaborators,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Load `name` from the store and build it.
    pub fn build_named(&self, name: &str) -> PipelineResult<Pipeline> {
        let doc = self.collaborators.store.get_pipeline(name)?;
        self.build(doc)
    }

    pub fn build(&self, doc: PipelineDoc) -> PipelineResult<Pipeline> {
        let order = build_order(&doc.pipeline)?;

        let mut index: HashMap<&str, NodeId> = HashMap::with_capacity(order.len());
        let mut nodes = Vec::with_capacity(order.len());
        for spec in &order {
            let logic = self.registry.create(&spec.node_type)?;
            index.insert(spec.name.as_str(), NodeId::from(nodes.len()));
            nodes.push(Node::new(spec, logic));
        }
        link(&mut nodes, &index);

        let sensors = self.resolve_sensors(&doc, &order)?;
        let alarm_settings = self.alarm_settings()?;

        for node in nodes.iter_mut() {
            let input_var = node.input_var.clone();
            let output_var = node.output_var.clone();
            let setup = NodeSetup {
                pipeline: &doc.name,
                collaborators: &self.collaborators,
                input_var: input_var.as_deref(),
                output_var: output_var.as_deref(),
                sensors: &sensors,
                alarm_settings: &alarm_settings,
                upstream_count: node.upstream.len(),
            };
            node.setup(&setup).map_err(|e| PipelineError::InvalidConfig {
                node: node.name.clone(),
                message: e.to_string(),
            })?;
        }

        let plan = PipelineCompiler::compile(&nodes);
        tracing::info!(
            "Built pipeline '{}': {} nodes in {} subpipelines",
            doc.name,
            plan.stats.total_nodes,
            plan.subpipelines.len()
        );

        configure_all(&mut nodes, &doc, &sensors)?;
        let startup_cycles = startup_cycles(&nodes);

        Ok(Pipeline::new(
            doc,
            nodes,
            plan,
            sensors,
            self.collaborators.store.clone(),
            self.settings,
            startup_cycles,
        ))
    }

    /// Sensor documents for `depends_on` plus every node variable that names a sensor.
    fn resolve_sensors(
        &self,
        doc: &PipelineDoc,
        order: &[&NodeSpec],
    ) -> PipelineResult<HashMap<String, SensorDoc>> {
        let mut names: Vec<String> = doc.depends_on.clone();
        for spec in order {
            names.extend(spec.variables());
        }

        let mut sensors = HashMap::new();
        for name in names {
            if sensors.contains_key(&name) {
                continue;
            }
            match self.collaborators.store.get_sensor_setting(&name) {
                Ok(sensor) => {
                    sensors.insert(name, sensor);
                }
                Err(StoreError::NotFound { .. }) => {
                    tracing::trace!("'{}' is not a sensor", name);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(sensors)
    }

    fn alarm_settings(&self) -> PipelineResult<AlarmSettings> {
        match self.collaborators.store.get_experiment_config("alarm") {
            Ok(section) => serde_json::from_value(section)
                .map_err(|e| PipelineError::ConfigRead(format!("alarm settings: {}", e))),
            Err(StoreError::NotFound { .. }) => Ok(AlarmSettings::default()),
            Err(e) => Err(e.into()),
        }
    }
}

fn link(nodes: &mut [Node], index: &HashMap<&str, NodeId>) {
    for i in 0..nodes.len() {
        let upstream: Vec<NodeId> = nodes[i]
            .upstream_names
            .iter()
            .filter_map(|name| index.get(name.as_str()).copied())
            .collect();
        for up in &upstream {
            nodes[up.index()].downstream.push(NodeId::from(i));
        }
        nodes[i].upstream = upstream;
    }
}

/// The `general` and per-node sections of a pipeline's `node_config`.
pub(crate) fn config_sections<'d>(
    doc: &'d PipelineDoc,
    node: &str,
) -> (Option<&'d ConfigMap>, Option<&'d ConfigMap>) {
    let general = doc.node_config.get("general").and_then(JsonValue::as_object);
    let specific = doc.node_config.get(node).and_then(JsonValue::as_object);
    (general, specific)
}

fn configure_all(
    nodes: &mut [Node],
    doc: &PipelineDoc,
    sensors: &HashMap<String, SensorDoc>,
) -> PipelineResult<()> {
    for node in nodes.iter_mut() {
        let (general, specific) = config_sections(doc, &node.name);
        let sensor = node
            .input_var
            .as_ref()
            .and_then(|v| sensors.get(v))
            .map(sensor_overlay);
        node.load_config(general, specific, sensor.as_ref())
            .map_err(|message| PipelineError::InvalidConfig {
                node: node.name.clone(),
                message,
            })?;
    }
    Ok(())
}

/// Cycles during which "buffer not full" failures are expected.
fn startup_cycles(nodes: &[Node]) -> u64 {
    let buffered = nodes.iter().filter(|n| n.is_buffered()).count();
    let longest = nodes
        .iter()
        .map(|n| n.buffer().length())
        .max()
        .unwrap_or(0);
    (buffered + longest) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use crate::telemetry::MemoryTelemetry;
    use serde_json::json;
    use std::sync::Arc;

    fn specs(json: JsonValue) -> Vec<NodeSpec> {
        serde_json::from_value(json).unwrap()
    }

    fn collaborators(store: Arc<MemoryStore>) -> Collaborators {
        Collaborators {
            store: store.clone(),
            telemetry: Arc::new(MemoryTelemetry::new()),
            alarms: store,
        }
    }

    #[test]
    fn test_spec_extra_keys_reach_config() {
        let spec: NodeSpec = serde_json::from_value(json!({
            "name": "poly", "type": "PolynomialNode", "upstream": ["src"],
            "input_var": "T", "transform": [1, 2]
        }))
        .unwrap();
        let cfg = spec.to_config();
        assert_eq!(cfg["transform"], json!([1, 2]));
        assert_eq!(cfg["input_var"], json!("T"));
        assert!(!cfg.contains_key("output_var"));
        assert!(!cfg.contains_key("name"));
    }

    #[test]
    fn test_order_follows_dependencies() {
        let specs = specs(json!([
            {"name": "c", "type": "X", "upstream": ["b"]},
            {"name": "b", "type": "X", "upstream": ["a"]},
            {"name": "a", "type": "X"}
        ]));
        let names: Vec<&str> = build_order(&specs)
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_self_cycle_is_build_error() {
        let specs = specs(json!([
            {"name": "src", "type": "X"},
            {"name": "loop", "type": "X", "upstream": ["loop"]}
        ]));
        match build_order(&specs) {
            Err(PipelineError::Build { built, unbuilt }) => {
                assert_eq!(built, vec!["src".to_string()]);
                assert_eq!(unbuilt, vec!["loop".to_string()]);
            }
            other => panic!("expected build error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_missing_upstream_is_build_error() {
        let specs = specs(json!([{"name": "a", "type": "X", "upstream": ["ghost"]}]));
        assert!(matches!(build_order(&specs), Err(PipelineError::Build { .. })));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let specs = specs(json!([{"name": "a", "type": "X"}, {"name": "a", "type": "X"}]));
        assert!(matches!(build_order(&specs), Err(PipelineError::DuplicateNode(_))));
    }

    #[test]
    fn test_build_wires_links_and_configures() {
        let store = Arc::new(MemoryStore::new());
        let mut doc = PipelineDoc::new("convert_t");
        doc.pipeline = specs(json!([
            {"name": "src", "type": "SensorSourceNode", "input_var": "T"},
            {"name": "lpf", "type": "LowPassFilterNode", "upstream": ["src"], "input_var": "T", "length": 3},
            {"name": "poly", "type": "PolynomialNode", "upstream": ["lpf"], "input_var": "T",
             "output_var": "T_cal", "transform": [0, 2]}
        ]));
        store.insert_pipeline(doc.clone()).unwrap();

        let registry = NodeRegistry::with_builtins();
        let pipeline = PipelineBuilder::new(&registry, collaborators(store))
            .build(doc)
            .unwrap();
        let nodes = pipeline.nodes();
        assert_eq!(nodes[0].downstream, vec![NodeId(1)]);
        assert_eq!(nodes[2].upstream, vec![NodeId(1)]);
        assert_eq!(nodes[1].buffer().length(), 3);
        // one buffered node plus the longest buffer
        assert_eq!(pipeline.startup_cycles(), 4);
        assert_eq!(pipeline.required_inputs(), vec!["T".to_string()]);
    }

    #[test]
    fn test_bad_config_fails_the_build() {
        let store = Arc::new(MemoryStore::new());
        let mut doc = PipelineDoc::new("convert_bad");
        doc.pipeline = specs(json!([
            {"name": "src", "type": "SensorSourceNode", "input_var": "T"},
            {"name": "lpf", "type": "LowPassFilterNode", "upstream": ["src"], "input_var": "T"}
        ]));
        let registry = NodeRegistry::with_builtins();
        let err = PipelineBuilder::new(&registry, collaborators(store))
            .build(doc)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig { ref node, .. } if node == "lpf"));
    }

    #[test]
    fn test_sensor_settings_feed_alarm_config() {
        let store = Arc::new(MemoryStore::new());
        let mut sensor = SensorDoc::new("T1");
        sensor.alarm_thresholds = Some([0.0, 10.0]);
        sensor.alarm_recurrence = Some(2);
        store.insert_sensor(sensor);

        let mut doc = PipelineDoc::new("alarm_t1");
        doc.depends_on = vec!["T1".to_string()];
        doc.pipeline = specs(json!([
            {"name": "src", "type": "SensorSourceNode", "input_var": "T1"},
            {"name": "alarm", "type": "SimpleAlarmNode", "upstream": ["src"], "input_var": "T1"}
        ]));
        let registry = NodeRegistry::with_builtins();
        let pipeline = PipelineBuilder::new(&registry, collaborators(store.clone()))
            .build(doc)
            .unwrap();
        assert_eq!(pipeline.nodes()[1].buffer().length(), 2);
        assert!(store.get_sensor_setting("T1").is_ok());
    }
}
