//! PipelineControlNode: starts, stops or silences other pipelines.
//!
//! On a rising edge of its (truthy) input, every configured
//! `[action, pipeline]` pair is queued as `pipelinectl_<action> <pipeline>`
//! for the monitor that owns the target pipeline.

use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::node::{parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin, NodeSetup};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::Package;
use crate::store::Store;
use crate::types::Flavor;
use serde::Deserialize;
use std::sync::Arc;

const ACTIONS: &[&str] = &["start", "stop", "restart", "silent", "active"];

#[derive(Debug, Deserialize)]
struct PipelineControlConfig {
    input_var: String,
    actions: Vec<[String; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
struct Action {
    command: String,
    monitor: String,
}

#[derive(Default)]
pub struct PipelineControlNode {
    input_var: String,
    actions: Vec<Action>,
    was_on: bool,
    store: Option<Arc<dyn Store>>,
}

impl PipelineControlNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodePlugin for PipelineControlNode {
    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.store = Some(setup.collaborators.store.clone());
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: PipelineControlConfig = parse_config(config)?;
        let mut actions = Vec::with_capacity(cfg.actions.len());
        for [action, target] in cfg.actions {
            if !ACTIONS.contains(&action.as_str()) {
                return Err(format!("unknown pipeline action '{}'", action));
            }
            let flavor = Flavor::of_pipeline(&target)
                .ok_or_else(|| format!("cannot tell the flavor of pipeline '{}'", target))?;
            actions.push(Action {
                command: format!("pipelinectl_{} {}", action, target),
                monitor: flavor.monitor_name(),
            });
        }
        self.input_var = cfg.input_var;
        self.actions = actions;
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let on = latest(input)?
            .get(&self.input_var)
            .ok_or_else(|| NodeError::MissingVariable(self.input_var.clone()))?
            .is_truthy();
        let rising = on && !self.was_on;
        self.was_on = on;
        if !rising {
            return Ok(NodeOutput::Passthrough);
        }
        if ctx.silence.is_silent {
            tracing::debug!("{}: silent, not issuing pipeline actions", ctx.pipeline);
            return Ok(NodeOutput::Passthrough);
        }

        let store = self
            .store
            .as_ref()
            .ok_or_else(|| NodeError::Other("command store not set up".to_string()))?;
        for action in &self.actions {
            tracing::info!("{}: {} -> {}", ctx.pipeline, action.command, action.monitor);
            store.log_command(&action.command, &action.monitor, ctx.pipeline, None, false)?;
        }
        Ok(NodeOutput::Passthrough)
    }
}
