//! Pipeline engine: node graphs built from documents and run in cycles.
//!
//! Packages flow along the edges of a directed graph of nodes: sources
//! produce them, transforms rewrite them, and sinks, alarms and controls act
//! on them.
//!
//! # Architecture
//!
//! ```text
//! [SensorSource T1] ──► [LowPassFilter] ──► [SimpleAlarm]
//!                                      └──► [InfluxSink]
//! [SensorSource P1] ──► [DeviceRespondingSync]
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinNode` enum for all built-in nodes,
//!   `NodePlugin` trait objects for registered device adapters.
//! - **Build once, configure every cycle**: the graph is fixed at build time;
//!   node configs are re-read from the store each cycle.
//! - **Subpipelines**: connected components run independently, so one failing
//!   branch does not stop the others.
//! - **Two disciplines**: periodic pipelines are driven by a monitor worker,
//!   pipelines with listening sources run on their own [`SyncPipeline`] thread.

pub mod buffer;
pub mod builder;
pub mod compiled_plan;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod id;
pub mod node;
pub mod node_type;
pub mod nodes;
pub mod packet;
pub mod registry;
pub mod sync;

pub use buffer::TimeBuffer;
pub use builder::{build_order, NodeSpec, PipelineBuilder, VarList};
pub use compiled_plan::{CompiledPlan, PlanStats};
pub use compiler::PipelineCompiler;
pub use error::{NodeError, NodeResult, PipelineError, PipelineResult};
pub use executor::{Pipeline, PipelineStats};
pub use id::NodeId;
pub use node::{
    AnyNode, BuiltinNode, Collaborators, ConfigMap, Intake, Listen, Node, NodeContext,
    NodeOutput, NodePlugin, NodeSetup, PipelineRequest, SilenceState, SILENCE_ALL,
};
pub use node_type::NodeType;
pub use packet::{Package, Value};
pub use registry::NodeRegistry;
pub use sync::SyncPipeline;
