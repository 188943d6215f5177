//! Built-in node implementations.

pub mod alarm;
pub mod control;
mod derivative;
mod eval;
mod filter;
mod influx_sink;
mod integral;
mod merge;
mod polynomial;
mod source;

pub use alarm::{
    BitmaskIntegerAlarmNode, DeviceRespondingNode, IntegerAlarmNode, SimpleAlarmNode,
};
pub use control::{
    AnalogControlNode, DigitalControlNode, PidControlNode, PipelineControlNode, ValveControlNode,
};
pub use derivative::DerivativeNode;
pub use eval::EvalNode;
pub use filter::LowPassFilterNode;
pub use influx_sink::InfluxSinkNode;
pub use integral::IntegralNode;
pub use merge::{MergeHow, MergeNode};
pub use polynomial::PolynomialNode;
pub use source::{InfluxSourceNode, SensorSourceNode};

use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::packet::Package;

fn default_true() -> bool {
    true
}

/// Extract `(time, value)` pairs of `var` from a window.
pub(crate) fn series(window: &[Package], var: &str) -> NodeResult<(Vec<f64>, Vec<f64>)> {
    let mut times = Vec::with_capacity(window.len());
    let mut values = Vec::with_capacity(window.len());
    for package in window {
        times.push(package.time);
        values.push(package.get_f64(var)?);
    }
    Ok((times, values))
}

/// Latest package of a window, failing when there is none.
pub(crate) fn latest(window: &[Package]) -> NodeResult<&Package> {
    window.last().ok_or(NodeError::EmptyBuffer)
}
