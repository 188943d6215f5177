//! Node type enumeration for building nodes from their spec `type` name.
//!
//! This is the closed set of built-in variants. Device-specific adapters are
//! added at runtime through [`NodeRegistry`](crate::pipeline::registry::NodeRegistry).

use crate::pipeline::node::{AnyNode, BuiltinNode};
use crate::pipeline::nodes::{
    AnalogControlNode, BitmaskIntegerAlarmNode, DerivativeNode, DeviceRespondingNode,
    DigitalControlNode, EvalNode, InfluxSinkNode, InfluxSourceNode, IntegerAlarmNode,
    IntegralNode, LowPassFilterNode, MergeNode, PidControlNode, PipelineControlNode,
    PolynomialNode, SensorSourceNode, SimpleAlarmNode, ValveControlNode,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Built-in node types, named as they appear in a pipeline document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    // Sources
    SensorSourceNode,
    InfluxSourceNode,

    // Transforms
    LowPassFilterNode,
    MergeNode,
    IntegralNode,
    DerivativeNode,
    PolynomialNode,
    EvalNode,

    // Sinks
    InfluxSinkNode,

    // Alarms
    DeviceRespondingInfluxNode,
    DeviceRespondingSyncNode,
    SimpleAlarmNode,
    IntegerAlarmNode,
    BitmaskIntegerAlarmNode,

    // Control
    DigitalControlNode,
    AnalogControlNode,
    #[serde(rename = "PIDControlNode")]
    PidControlNode,
    PipelineControlNode,
    ValveControlNode,
}

impl NodeType {
    /// Name used in the `type` field of a node spec.
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::SensorSourceNode => "SensorSourceNode",
            NodeType::InfluxSourceNode => "InfluxSourceNode",
            NodeType::LowPassFilterNode => "LowPassFilterNode",
            NodeType::MergeNode => "MergeNode",
            NodeType::IntegralNode => "IntegralNode",
            NodeType::DerivativeNode => "DerivativeNode",
            NodeType::PolynomialNode => "PolynomialNode",
            NodeType::EvalNode => "EvalNode",
            NodeType::InfluxSinkNode => "InfluxSinkNode",
            NodeType::DeviceRespondingInfluxNode => "DeviceRespondingInfluxNode",
            NodeType::DeviceRespondingSyncNode => "DeviceRespondingSyncNode",
            NodeType::SimpleAlarmNode => "SimpleAlarmNode",
            NodeType::IntegerAlarmNode => "IntegerAlarmNode",
            NodeType::BitmaskIntegerAlarmNode => "BitmaskIntegerAlarmNode",
            NodeType::DigitalControlNode => "DigitalControlNode",
            NodeType::AnalogControlNode => "AnalogControlNode",
            NodeType::PidControlNode => "PIDControlNode",
            NodeType::PipelineControlNode => "PipelineControlNode",
            NodeType::ValveControlNode => "ValveControlNode",
        }
    }

    /// Get all built-in node types.
    pub fn all() -> &'static [NodeType] {
        &[
            NodeType::SensorSourceNode,
            NodeType::InfluxSourceNode,
            NodeType::LowPassFilterNode,
            NodeType::MergeNode,
            NodeType::IntegralNode,
            NodeType::DerivativeNode,
            NodeType::PolynomialNode,
            NodeType::EvalNode,
            NodeType::InfluxSinkNode,
            NodeType::DeviceRespondingInfluxNode,
            NodeType::DeviceRespondingSyncNode,
            NodeType::SimpleAlarmNode,
            NodeType::IntegerAlarmNode,
            NodeType::BitmaskIntegerAlarmNode,
            NodeType::DigitalControlNode,
            NodeType::AnalogControlNode,
            NodeType::PidControlNode,
            NodeType::PipelineControlNode,
            NodeType::ValveControlNode,
        ]
    }

    pub fn is_alarm(&self) -> bool {
        matches!(
            self,
            NodeType::DeviceRespondingInfluxNode
                | NodeType::DeviceRespondingSyncNode
                | NodeType::SimpleAlarmNode
                | NodeType::IntegerAlarmNode
                | NodeType::BitmaskIntegerAlarmNode
        )
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            NodeType::DigitalControlNode
                | NodeType::AnalogControlNode
                | NodeType::PidControlNode
                | NodeType::PipelineControlNode
                | NodeType::ValveControlNode
        )
    }

    /// Create a fresh, unconfigured node of this type.
    pub fn instantiate(&self) -> AnyNode {
        let node = match self {
            NodeType::SensorSourceNode => BuiltinNode::SensorSource(SensorSourceNode::new()),
            NodeType::InfluxSourceNode => BuiltinNode::InfluxSource(InfluxSourceNode::new()),
            NodeType::LowPassFilterNode => BuiltinNode::LowPassFilter(LowPassFilterNode::new()),
            NodeType::MergeNode => BuiltinNode::Merge(MergeNode::new()),
            NodeType::IntegralNode => BuiltinNode::Integral(IntegralNode::new()),
            NodeType::DerivativeNode => BuiltinNode::Derivative(DerivativeNode::new()),
            NodeType::PolynomialNode => BuiltinNode::Polynomial(PolynomialNode::new()),
            NodeType::EvalNode => BuiltinNode::Eval(EvalNode::new()),
            NodeType::InfluxSinkNode => BuiltinNode::InfluxSink(InfluxSinkNode::new()),
            NodeType::DeviceRespondingInfluxNode => {
                BuiltinNode::DeviceResponding(DeviceRespondingNode::influx())
            }
            NodeType::DeviceRespondingSyncNode => {
                BuiltinNode::DeviceResponding(DeviceRespondingNode::sync())
            }
            NodeType::SimpleAlarmNode => BuiltinNode::SimpleAlarm(SimpleAlarmNode::new()),
            NodeType::IntegerAlarmNode => BuiltinNode::IntegerAlarm(IntegerAlarmNode::new()),
            NodeType::BitmaskIntegerAlarmNode => {
                BuiltinNode::BitmaskIntegerAlarm(BitmaskIntegerAlarmNode::new())
            }
            NodeType::DigitalControlNode => BuiltinNode::DigitalControl(DigitalControlNode::new()),
            NodeType::AnalogControlNode => BuiltinNode::AnalogControl(AnalogControlNode::new()),
            NodeType::PidControlNode => BuiltinNode::PidControl(PidControlNode::new()),
            NodeType::PipelineControlNode => {
                BuiltinNode::PipelineControl(PipelineControlNode::new())
            }
            NodeType::ValveControlNode => BuiltinNode::ValveControl(ValveControlNode::new()),
        };
        AnyNode::Builtin(node)
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::all()
            .iter()
            .find(|t| t.name() == s)
            .copied()
            .ok_or_else(|| format!("unknown node type '{}'", s))
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for t in NodeType::all() {
            assert_eq!(t.name().parse::<NodeType>().unwrap(), *t);
        }
        assert_eq!(NodeType::all().len(), 19);
    }

    #[test]
    fn test_pid_keeps_its_document_name() {
        assert_eq!("PIDControlNode".parse::<NodeType>().unwrap(), NodeType::PidControlNode);
        let json = serde_json::to_string(&NodeType::PidControlNode).unwrap();
        assert_eq!(json, "\"PIDControlNode\"");
    }

    #[test]
    fn test_unknown_name() {
        assert!("AlarmNode".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_device_responding_variants_listen_differently() {
        use crate::pipeline::node::{Listen, NodePlugin};
        let listen = |t: NodeType| match t.instantiate() {
            AnyNode::Builtin(n) => n.listen(),
            AnyNode::Plugin(n) => n.listen(),
        };
        assert_eq!(listen(NodeType::DeviceRespondingSyncNode), Listen::Optional);
        assert_eq!(listen(NodeType::DeviceRespondingInfluxNode), Listen::No);
        assert_eq!(listen(NodeType::SensorSourceNode), Listen::Required);
    }
}
