//! Node abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`NodePlugin` trait**: the per-node contract (`setup`, `load_config`,
//!   `process`, `on_error_do_this`). Device-specific leaf adapters implement
//!   it and are registered by name.
//! - **`BuiltinNode` enum**: every built-in variant. Each implements the same
//!   trait, and the enum dispatches with a `match`, so the hot path has no
//!   dynamic dispatch.
//!
//! `AnyNode` wraps either variant, and [`Node`] adds what the engine owns for
//! every node: identity, links, the input buffer, and the silence flag.

use crate::pipeline::buffer::TimeBuffer;
use crate::pipeline::builder::NodeSpec;
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::id::NodeId;
use crate::pipeline::nodes::alarm::{AlarmSettings, AlarmState};
use crate::pipeline::nodes::{
    AnalogControlNode, DerivativeNode, DeviceRespondingNode, DigitalControlNode, EvalNode,
    InfluxSinkNode, InfluxSourceNode, IntegerAlarmNode, IntegralNode, LowPassFilterNode,
    MergeNode, PidControlNode, PipelineControlNode, PolynomialNode, SensorSourceNode,
    SimpleAlarmNode, ValveControlNode, BitmaskIntegerAlarmNode,
};
use crate::pipeline::packet::{Package, Value};
use crate::store::{AlarmSink, SensorDoc, Store};
use crate::telemetry::Telemetry;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Merged configuration handed to `load_config`.
pub type ConfigMap = serde_json::Map<String, JsonValue>;

/// Deserialize a typed node config from an overlay. Unknown keys are ignored.
pub fn parse_config<T: DeserializeOwned>(config: &ConfigMap) -> Result<T, String> {
    serde_json::from_value(JsonValue::Object(config.clone())).map_err(|e| e.to_string())
}

/// External services a node may talk to. Injected once at setup.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub telemetry: Arc<dyn Telemetry>,
    pub alarms: Arc<dyn AlarmSink>,
}

/// One-time build parameters for [`NodePlugin::setup`].
pub struct NodeSetup<'a> {
    pub pipeline: &'a str,
    pub collaborators: &'a Collaborators,
    pub input_var: Option<&'a str>,
    pub output_var: Option<&'a str>,
    /// Sensor documents resolved from the pipeline's inputs and outputs.
    pub sensors: &'a HashMap<String, SensorDoc>,
    pub alarm_settings: &'a AlarmSettings,
    pub upstream_count: usize,
}

impl NodeSetup<'_> {
    pub fn sensor(&self, name: &str) -> Option<&SensorDoc> {
        self.sensors.get(name)
    }
}

/// Level used by a manual silence: nothing gets through.
pub const SILENCE_ALL: i64 = i64::MAX;

/// Silence seen by nodes during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceState {
    pub is_silent: bool,
    /// Alarms at or below this level are suppressed while silent.
    pub silenced_at_level: i64,
}

impl SilenceState {
    pub const ACTIVE: SilenceState = SilenceState {
        is_silent: false,
        silenced_at_level: -1,
    };

    pub const fn fully_silent() -> Self {
        SilenceState {
            is_silent: true,
            silenced_at_level: SILENCE_ALL,
        }
    }

    /// Whether an alarm message at `level` may be delivered.
    pub fn allows(&self, level: i64) -> bool {
        !self.is_silent || self.silenced_at_level < level
    }
}

/// Requests a node makes of its owning pipeline during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineRequest {
    /// Silence alarms at or below `level` for `duration` seconds.
    SilenceFor { duration: f64, level: i64 },
}

/// Context passed to node hooks each cycle.
pub struct NodeContext<'a> {
    pub pipeline: &'a str,
    /// Cycle counter of the owning pipeline.
    pub cycle: u64,
    /// Wall-clock time at the start of the cycle.
    pub now: f64,
    pub silence: SilenceState,
    pub requests: &'a mut Vec<PipelineRequest>,
}

impl NodeContext<'_> {
    pub fn request(&mut self, request: PipelineRequest) {
        self.requests.push(request);
    }
}

/// Result of `process`.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Forward the input package unchanged.
    Passthrough,
    /// Set `output_var` on the input package and forward it.
    Value(Value),
    /// Forward this package instead of the input.
    Package(Package),
}

/// How the engine pulls a node's input from its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// Pop the oldest package.
    Pop,
    /// Hand over the whole window; `strict` refuses to run until it is full.
    Window { strict: bool },
    /// Hand over the full window and clear it afterwards.
    Drain,
    /// The node produces its own package via `read_source`.
    Source,
}

/// Whether a node is fed by externally injected sensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listen {
    No,
    /// A cycle needs a fresh value for this input.
    Required,
    /// Values are consumed when present.
    Optional,
}

/// Per-node contract.
pub trait NodePlugin: Send {
    fn intake(&self) -> Intake {
        Intake::Pop
    }

    /// Capacity of the node's input buffer.
    fn buffer_length(&self) -> usize {
        1
    }

    fn listen(&self) -> Listen {
        Listen::No
    }

    /// One-time initialization after the graph is wired.
    fn setup(&mut self, _setup: &NodeSetup) -> NodeResult<()> {
        Ok(())
    }

    /// Apply a merged config. On error the previous config stays in effect.
    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String>;

    /// Produce this cycle's package. Only called for [`Intake::Source`].
    fn read_source(&mut self, buffer: &mut TimeBuffer, _ctx: &mut NodeContext) -> NodeResult<Package> {
        buffer.pop_front()
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput>;

    /// Called on every node of a subpipeline whose cycle was aborted.
    fn on_error_do_this(&mut self, _ctx: &mut NodeContext) {}

    fn alarm_state(&self) -> Option<&AlarmState> {
        None
    }
}

/// Enum dispatch for built-in nodes.
pub enum BuiltinNode {
    SensorSource(SensorSourceNode),
    InfluxSource(InfluxSourceNode),
    LowPassFilter(LowPassFilterNode),
    Merge(MergeNode),
    Integral(IntegralNode),
    Derivative(DerivativeNode),
    Polynomial(PolynomialNode),
    Eval(EvalNode),
    InfluxSink(InfluxSinkNode),
    DeviceResponding(DeviceRespondingNode),
    SimpleAlarm(SimpleAlarmNode),
    IntegerAlarm(IntegerAlarmNode),
    BitmaskIntegerAlarm(BitmaskIntegerAlarmNode),
    DigitalControl(DigitalControlNode),
    AnalogControl(AnalogControlNode),
    PidControl(PidControlNode),
    PipelineControl(PipelineControlNode),
    ValveControl(ValveControlNode),
}

macro_rules! dispatch {
    ($self:expr, $n:ident => $call:expr) => {
        match $self {
            BuiltinNode::SensorSource($n) => $call,
            BuiltinNode::InfluxSource($n) => $call,
            BuiltinNode::LowPassFilter($n) => $call,
            BuiltinNode::Merge($n) => $call,
            BuiltinNode::Integral($n) => $call,
            BuiltinNode::Derivative($n) => $call,
            BuiltinNode::Polynomial($n) => $call,
            BuiltinNode::Eval($n) => $call,
            BuiltinNode::InfluxSink($n) => $call,
            BuiltinNode::DeviceResponding($n) => $call,
            BuiltinNode::SimpleAlarm($n) => $call,
            BuiltinNode::IntegerAlarm($n) => $call,
            BuiltinNode::BitmaskIntegerAlarm($n) => $call,
            BuiltinNode::DigitalControl($n) => $call,
            BuiltinNode::AnalogControl($n) => $call,
            BuiltinNode::PidControl($n) => $call,
            BuiltinNode::PipelineControl($n) => $call,
            BuiltinNode::ValveControl($n) => $call,
        }
    };
}

impl NodePlugin for BuiltinNode {
    fn intake(&self) -> Intake {
        dispatch!(self, n => n.intake())
    }

    fn buffer_length(&self) -> usize {
        dispatch!(self, n => n.buffer_length())
    }

    fn listen(&self) -> Listen {
        dispatch!(self, n => n.listen())
    }

    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        dispatch!(self, n => n.setup(setup))
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        dispatch!(self, n => n.load_config(config))
    }

    fn read_source(&mut self, buffer: &mut TimeBuffer, ctx: &mut NodeContext) -> NodeResult<Package> {
        dispatch!(self, n => n.read_source(buffer, ctx))
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        dispatch!(self, n => n.process(input, ctx))
    }

    fn on_error_do_this(&mut self, ctx: &mut NodeContext) {
        dispatch!(self, n => n.on_error_do_this(ctx))
    }

    fn alarm_state(&self) -> Option<&AlarmState> {
        dispatch!(self, n => n.alarm_state())
    }
}

/// Wrapper that holds either a built-in node (enum dispatch) or a plugin (trait object).
pub enum AnyNode {
    Builtin(BuiltinNode),
    Plugin(Box<dyn NodePlugin>),
}

impl AnyNode {
    fn inner(&self) -> &dyn NodePlugin {
        match self {
            AnyNode::Builtin(n) => n,
            AnyNode::Plugin(n) => n.as_ref(),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn NodePlugin {
        match self {
            AnyNode::Builtin(n) => n,
            AnyNode::Plugin(n) => n.as_mut(),
        }
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self, AnyNode::Plugin(_))
    }
}

impl From<BuiltinNode> for AnyNode {
    fn from(node: BuiltinNode) -> Self {
        AnyNode::Builtin(node)
    }
}

/// A node as owned by its pipeline.
pub struct Node {
    pub name: String,
    pub node_type: String,
    pub input_var: Option<String>,
    pub output_var: Option<String>,
    pub upstream_names: Vec<String>,
    pub upstream: Vec<NodeId>,
    pub downstream: Vec<NodeId>,
    pub is_silent: bool,
    buffer: TimeBuffer,
    /// Keys of the node spec; the base layer of every config overlay.
    spec_config: ConfigMap,
    logic: AnyNode,
}

impl Node {
    pub fn new(spec: &NodeSpec, logic: AnyNode) -> Self {
        let input_var = spec.input_var.as_ref().and_then(|v| v.first().map(str::to_string));
        let output_var = spec.output_var.clone().or_else(|| input_var.clone());
        Self {
            name: spec.name.clone(),
            node_type: spec.node_type.clone(),
            input_var,
            output_var,
            upstream_names: spec.upstream.clone(),
            upstream: Vec::new(),
            downstream: Vec::new(),
            is_silent: false,
            buffer: TimeBuffer::new(1),
            spec_config: spec.to_config(),
            logic,
        }
    }

    pub fn logic(&self) -> &AnyNode {
        &self.logic
    }

    pub fn buffer(&self) -> &TimeBuffer {
        &self.buffer
    }

    pub fn intake(&self) -> Intake {
        self.logic.inner().intake()
    }

    pub fn listen(&self) -> Listen {
        self.logic.inner().listen()
    }

    pub fn is_source(&self) -> bool {
        self.intake() == Intake::Source
    }

    /// Buffered nodes hold a window rather than a single slot.
    pub fn is_buffered(&self) -> bool {
        matches!(self.intake(), Intake::Window { .. } | Intake::Drain)
    }

    pub fn alarm_state(&self) -> Option<&AlarmState> {
        self.logic.inner().alarm_state()
    }

    pub fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.logic.inner_mut().setup(setup)?;
        self.buffer.set_length(self.logic.inner().buffer_length());
        Ok(())
    }

    /// Overlay `spec ⊕ general ⊕ node-specific ⊕ sensor-derived` and apply it.
    pub fn load_config(
        &mut self,
        general: Option<&ConfigMap>,
        specific: Option<&ConfigMap>,
        sensor: Option<&ConfigMap>,
    ) -> Result<(), String> {
        let mut overlay = self.spec_config.clone();
        for layer in [general, specific, sensor].into_iter().flatten() {
            for (k, v) in layer {
                overlay.insert(k.clone(), v.clone());
            }
        }
        self.logic.inner_mut().load_config(&overlay)?;
        self.buffer.set_length(self.logic.inner().buffer_length());
        Ok(())
    }

    /// Deliver a package into this node's buffer.
    pub fn receive(&mut self, package: Package) {
        self.buffer.append(package);
    }

    /// Run one cycle and return the package to fan out downstream.
    pub fn run(&mut self, ctx: &mut NodeContext) -> NodeResult<Package> {
        self.is_silent = ctx.silence.is_silent;
        let logic = self.logic.inner_mut();

        let input = match logic.intake() {
            Intake::Source => vec![logic.read_source(&mut self.buffer, ctx)?],
            Intake::Pop => vec![self.buffer.pop_front()?],
            Intake::Window { strict } => {
                check_window(&self.buffer, strict)?;
                self.buffer.to_vec()
            }
            Intake::Drain => {
                check_window(&self.buffer, true)?;
                let window = self.buffer.to_vec();
                self.buffer.clear();
                window
            }
        };

        let output = logic.process(&input, ctx)?;
        let latest = input.last().cloned().ok_or(NodeError::EmptyBuffer)?;
        match output {
            NodeOutput::Passthrough => Ok(latest),
            NodeOutput::Package(package) => Ok(package),
            NodeOutput::Value(value) => {
                let key = self
                    .output_var
                    .as_deref()
                    .ok_or_else(|| NodeError::Other("node has no output_var".to_string()))?;
                let mut package = latest;
                package.insert(key, value);
                Ok(package)
            }
        }
    }

    pub fn on_error_do_this(&mut self, ctx: &mut NodeContext) {
        self.logic.inner_mut().on_error_do_this(ctx);
    }
}

fn check_window(buffer: &TimeBuffer, strict: bool) -> NodeResult<()> {
    if buffer.is_empty() {
        return Err(NodeError::EmptyBuffer);
    }
    if strict && !buffer.is_full() {
        return Err(NodeError::BufferNotFull {
            have: buffer.len(),
            want: buffer.length(),
        });
    }
    Ok(())
}

/// Sensor settings as a config layer: the `name` key and unset fields are dropped.
pub fn sensor_overlay(doc: &SensorDoc) -> ConfigMap {
    let mut map = match serde_json::to_value(doc) {
        Ok(JsonValue::Object(map)) => map,
        _ => ConfigMap::new(),
    };
    map.remove("name");
    map.retain(|_, v| !(v.is_null() || v.as_str().is_some_and(str::is_empty)));
    map
}
