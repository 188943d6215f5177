//! Control nodes: turn pipeline values into commands.
//!
//! Output commands go through the store's command queue, addressed to a
//! device (`control_target`) as `set <control_value> <value>`. A
//! [`ControlOutput`] only issues a command when the value changed and the
//! pipeline is not silent; the error hook bypasses both checks to drive
//! the target to its `default_output`.

mod analog;
mod digital;
mod pid;
mod pipeline_control;
mod valve;

pub use analog::AnalogControlNode;
pub use digital::DigitalControlNode;
pub use pid::PidControlNode;
pub use pipeline_control::PipelineControlNode;
pub use valve::ValveControlNode;

use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{NodeContext, NodeSetup};
use crate::store::Store;
use serde::Deserialize;
use std::sync::Arc;

/// Keys every value-emitting control node shares.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OutputConfig {
    control_target: String,
    control_value: String,
    #[serde(default)]
    default_output: Option<f64>,
}

/// Command emitter shared by value-emitting control nodes.
#[derive(Default)]
pub struct ControlOutput {
    store: Option<Arc<dyn Store>>,
    target: String,
    quantity: String,
    default_output: Option<f64>,
    last_output: Option<f64>,
}

impl ControlOutput {
    pub fn setup(&mut self, setup: &NodeSetup) {
        self.store = Some(setup.collaborators.store.clone());
    }

    pub(crate) fn configure(&mut self, cfg: OutputConfig) {
        if cfg.control_target != self.target || cfg.control_value != self.quantity {
            self.last_output = None;
        }
        self.target = cfg.control_target;
        self.quantity = cfg.control_value;
        self.default_output = cfg.default_output;
    }

    pub fn last_output(&self) -> Option<f64> {
        self.last_output
    }

    /// Issue `value` unless it is unchanged or the pipeline is silent.
    pub fn set_output(&mut self, value: f64, ctx: &NodeContext) -> NodeResult<()> {
        if ctx.silence.is_silent {
            tracing::debug!("{}: silent, holding {} at {:?}", ctx.pipeline, self.target, self.last_output);
            return Ok(());
        }
        if self.last_output == Some(value) {
            return Ok(());
        }
        self.issue(value, ctx)
    }

    /// Drive the target to `default_output`, if one is configured.
    pub fn fail_safe(&mut self, ctx: &NodeContext) {
        let Some(value) = self.default_output else {
            return;
        };
        tracing::warn!(
            "{}: setting {} {} to default {}",
            ctx.pipeline,
            self.target,
            self.quantity,
            value
        );
        if let Err(e) = self.issue(value, ctx) {
            tracing::error!("{}: could not send default output: {}", ctx.pipeline, e);
        }
    }

    fn issue(&mut self, value: f64, ctx: &NodeContext) -> NodeResult<()> {
        let Some(store) = &self.store else {
            return Err(crate::pipeline::error::NodeError::Other(
                "command store not set up".to_string(),
            ));
        };
        let command = format!("set {} {}", self.quantity, value);
        tracing::debug!("{}: {} <- '{}'", ctx.pipeline, self.target, command);
        store.log_command(&command, &self.target, ctx.pipeline, None, false)?;
        self.last_output = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::node::{Collaborators, SilenceState};
    use crate::pipeline::nodes::testing::Harness;
    use crate::store::MockStore;

    fn output(h: &Harness, default_output: Option<f64>) -> ControlOutput {
        let mut out = ControlOutput::default();
        h.setup_with(|setup| out.setup(setup));
        out.configure(OutputConfig {
            control_target: "heater".to_string(),
            control_value: "power".to_string(),
            default_output,
        });
        out
    }

    #[test]
    fn test_issues_only_on_change() {
        let mut h = Harness::new();
        let mut mock = MockStore::new();
        mock.expect_log_command()
            .withf(|command, to, issuer, delay, bypass| {
                command == "set power 2" && to == "heater" && issuer == "alarm_test" && delay.is_none() && !bypass
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        h.collaborators = Collaborators {
            store: Arc::new(mock),
            ..h.collaborators.clone()
        };
        let mut out = output(&h, None);
        let ctx = h.ctx();
        out.set_output(2.0, &ctx).unwrap();
        out.set_output(2.0, &ctx).unwrap();
        assert_eq!(out.last_output(), Some(2.0));
    }

    #[test]
    fn test_silent_holds_and_fail_safe_bypasses() {
        let mut h = Harness::new();
        h.silence = SilenceState::fully_silent();
        let mut out = output(&h, Some(0.0));
        {
            let ctx = h.ctx();
            out.set_output(5.0, &ctx).unwrap();
            assert!(out.last_output().is_none());
            out.fail_safe(&ctx);
        }
        let commands = h.store.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "set power 0");
    }
}
