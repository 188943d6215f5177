//! Device-responding alarm: fires when a sensor stops reporting.
//!
//! The detector is the same for both registry names; only the [`Sampler`]
//! that observes new readings differs. `DeviceRespondingInfluxNode` polls
//! telemetry for the newest point, `DeviceRespondingSyncNode` consumes
//! values injected by the monitor.

use super::{default_alarm_level, AlarmEvaluator, AlarmState};
use crate::pipeline::buffer::TimeBuffer;
use crate::pipeline::error::{NodeError, NodeResult};
use crate::pipeline::node::{
    parse_config, ConfigMap, Intake, Listen, NodeContext, NodeOutput, NodePlugin, NodeSetup,
};
use crate::pipeline::packet::Package;
use crate::telemetry::Telemetry;
use serde::Deserialize;
use std::sync::Arc;

fn default_readout_interval() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    10.0
}

#[derive(Debug, Deserialize)]
struct DeviceRespondingConfig {
    input_var: String,
    #[serde(default = "default_readout_interval")]
    readout_interval: f64,
    #[serde(default = "default_max_delay")]
    max_reading_delay: f64,
    #[serde(default = "default_alarm_level")]
    alarm_level: i64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    topic: String,
}

/// Where new readings come from.
pub enum Sampler {
    /// Latest point from telemetry, queried every cycle.
    Influx {
        topic: String,
        telemetry: Option<Arc<dyn Telemetry>>,
    },
    /// Values delivered into the node's buffer from outside.
    Sync,
}

impl Sampler {
    fn sample(
        &self,
        sensor: &str,
        buffer: &mut TimeBuffer,
        ctx: &NodeContext,
    ) -> NodeResult<Option<Package>> {
        match self {
            Sampler::Influx { topic, telemetry } => {
                let telemetry = telemetry
                    .as_ref()
                    .ok_or_else(|| NodeError::Other("telemetry not set up".to_string()))?;
                match telemetry.read_latest(topic, sensor) {
                    Ok((time, value)) => Ok(Some(Package::new(time).with(sensor, value))),
                    Err(e) => {
                        tracing::debug!("{}: no reading for {}: {}", ctx.pipeline, sensor, e);
                        Ok(None)
                    }
                }
            }
            Sampler::Sync => {
                let mut newest = None;
                while let Ok(package) = buffer.pop_front() {
                    newest = Some(package);
                }
                Ok(newest)
            }
        }
    }
}

pub struct DeviceRespondingNode {
    sampler: Sampler,
    input_var: String,
    description: String,
    /// Readings older than this many seconds raise the alarm.
    max_silence: f64,
    last_seen: Option<f64>,
    alarm: AlarmEvaluator,
}

impl DeviceRespondingNode {
    fn with_sampler(sampler: Sampler) -> Self {
        Self {
            sampler,
            input_var: String::new(),
            description: String::new(),
            max_silence: default_readout_interval() + default_max_delay(),
            last_seen: None,
            alarm: AlarmEvaluator::new(),
        }
    }

    pub fn influx() -> Self {
        Self::with_sampler(Sampler::Influx {
            topic: String::new(),
            telemetry: None,
        })
    }

    pub fn sync() -> Self {
        Self::with_sampler(Sampler::Sync)
    }

    pub fn last_seen(&self) -> Option<f64> {
        self.last_seen
    }
}

impl NodePlugin for DeviceRespondingNode {
    fn intake(&self) -> Intake {
        Intake::Source
    }

    fn listen(&self) -> Listen {
        match self.sampler {
            Sampler::Sync => Listen::Optional,
            Sampler::Influx { .. } => Listen::No,
        }
    }

    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.alarm.setup(setup);
        if let Sampler::Influx { telemetry, .. } = &mut self.sampler {
            *telemetry = Some(setup.collaborators.telemetry.clone());
        }
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: DeviceRespondingConfig = parse_config(config)?;
        if let Sampler::Influx { topic, .. } = &mut self.sampler {
            if cfg.topic.is_empty() {
                return Err(format!("no topic known for '{}'", cfg.input_var));
            }
            *topic = cfg.topic;
        }
        self.max_silence = cfg.readout_interval + cfg.max_reading_delay;
        self.description = if cfg.description.is_empty() {
            cfg.input_var.clone()
        } else {
            cfg.description
        };
        self.input_var = cfg.input_var;
        self.alarm.set_base_level(cfg.alarm_level);
        Ok(())
    }

    fn read_source(&mut self, buffer: &mut TimeBuffer, ctx: &mut NodeContext) -> NodeResult<Package> {
        match self.sampler.sample(&self.input_var, buffer, ctx)? {
            Some(package) => {
                let seen = self.last_seen.map_or(package.time, |t| t.max(package.time));
                self.last_seen = Some(seen);
                Ok(package)
            }
            None => Ok(Package::new(ctx.now)),
        }
    }

    fn process(&mut self, _input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        // The first cycle starts the clock
        let last_seen = *self.last_seen.get_or_insert(ctx.now);
        let quiet_for = ctx.now - last_seen;
        if quiet_for > self.max_silence {
            let message = format!(
                "{} has not reported for {:.0} s (expected every {:.0} s)",
                self.description, quiet_for, self.max_silence
            );
            self.alarm.log_alarm(&message, ctx.now, ctx)?;
        } else {
            self.alarm.reset_alarm();
        }
        Ok(NodeOutput::Passthrough)
    }

    fn alarm_state(&self) -> Option<&AlarmState> {
        Some(self.alarm.state())
    }
}
