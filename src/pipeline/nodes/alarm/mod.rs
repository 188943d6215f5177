//! Alarm nodes and the escalation state machine they share.
//!
//! Every alarm node owns an [`AlarmEvaluator`]. Detectors decide each cycle
//! whether their condition holds and call [`AlarmEvaluator::log_alarm`] or
//! [`AlarmEvaluator::reset_alarm`]; the evaluator tracks the open alarm's
//! identity, counts messages, escalates, and asks the pipeline to silence
//! itself after a delivery attempt.
//!
//! ```text
//! clear --condition--> open --count > escalation_config[level]--> escalated
//!   ^                    |                                            |
//!   +------------------ reset_alarm (condition gone) -----------------+
//! ```

mod device_responding;
mod integer;
mod simple;

pub use device_responding::{DeviceRespondingNode, Sampler};
pub use integer::{BitmaskIntegerAlarmNode, IntegerAlarmNode};
pub use simple::SimpleAlarmNode;

use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{NodeContext, NodeSetup, PipelineRequest};
use crate::store::{AlarmMessage, AlarmSink};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

fn default_escalation() -> Vec<u64> {
    vec![3, 3, 3, 3]
}

fn default_silence_duration() -> Vec<f64> {
    vec![300.0, 300.0, 600.0, 900.0]
}

fn default_cant_send() -> f64 {
    60.0
}

/// Experiment-wide alarm tables, read from the `alarm` experiment config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmSettings {
    /// Messages allowed at each level before escalating to the next.
    #[serde(default = "default_escalation")]
    pub escalation_config: Vec<u64>,
    /// Seconds to silence after a successful delivery, per level.
    #[serde(default = "default_silence_duration")]
    pub silence_duration: Vec<f64>,
    /// Seconds to silence after a failed delivery.
    #[serde(default = "default_cant_send")]
    pub silence_duration_cant_send: f64,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            escalation_config: default_escalation(),
            silence_duration: default_silence_duration(),
            silence_duration_cant_send: default_cant_send(),
        }
    }
}

impl AlarmSettings {
    /// Silence after a delivery at `level`. Levels past the table use its last entry.
    pub fn silence_after(&self, level: i64) -> f64 {
        let idx = usize::try_from(level).unwrap_or(0);
        self.silence_duration
            .get(idx)
            .or_else(|| self.silence_duration.last())
            .copied()
            .unwrap_or(self.silence_duration_cant_send)
    }

    fn escalation_threshold(&self, level: i64) -> Option<u64> {
        usize::try_from(level)
            .ok()
            .and_then(|idx| self.escalation_config.get(idx))
            .copied()
    }

    /// Highest escalation offset reachable from `base_level`.
    fn max_escalation(&self, base_level: i64) -> i64 {
        (self.escalation_config.len() as i64 - 1 - base_level).max(0)
    }
}

/// Observable alarm state of one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmState {
    /// Identity of the open alarm; `None` while clear.
    pub hash: Option<String>,
    pub alarm_start: Option<f64>,
    pub escalation_level: i64,
    pub messages_this_level: u64,
}

impl AlarmState {
    pub fn is_open(&self) -> bool {
        self.hash.is_some()
    }
}

/// Opaque alarm identity derived from the opening time and pipeline.
pub fn alarm_hash(timestamp: f64, pipeline: &str) -> String {
    let mut hasher = DefaultHasher::new();
    timestamp.to_bits().hash(&mut hasher);
    pipeline.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Escalation and delivery logic shared by every alarm node.
#[derive(Default)]
pub struct AlarmEvaluator {
    state: AlarmState,
    settings: AlarmSettings,
    base_level: i64,
    sink: Option<Arc<dyn AlarmSink>>,
    /// Cycle whose first message was already counted.
    counted_cycle: Option<u64>,
}

impl AlarmEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup(&mut self, setup: &NodeSetup) {
        self.settings = setup.alarm_settings.clone();
        self.sink = Some(setup.collaborators.alarms.clone());
    }

    pub fn set_base_level(&mut self, level: i64) {
        self.base_level = level.max(0);
    }

    pub fn base_level(&self) -> i64 {
        self.base_level
    }

    pub fn state(&self) -> &AlarmState {
        &self.state
    }

    /// Level a message would be delivered at right now.
    pub fn current_level(&self) -> i64 {
        self.base_level + self.state.escalation_level
    }

    /// Record that the alarm condition holds and try to deliver `message`.
    pub fn log_alarm(&mut self, message: &str, timestamp: f64, ctx: &mut NodeContext) -> NodeResult<()> {
        let level = self.current_level();
        if !ctx.silence.allows(level) {
            tracing::debug!(
                "{}: suppressed level {} alarm (silenced at {})",
                ctx.pipeline,
                level,
                ctx.silence.silenced_at_level
            );
            return Ok(());
        }

        // An alarm only opens once a message actually goes out.
        if self.state.hash.is_none() {
            self.state.hash = Some(alarm_hash(timestamp, ctx.pipeline));
            self.state.alarm_start = Some(timestamp);
            tracing::info!("{}: alarm opened: {}", ctx.pipeline, message);
        }

        if self.counted_cycle != Some(ctx.cycle) {
            self.counted_cycle = Some(ctx.cycle);
            self.count_message();
        }

        let alarm = AlarmMessage {
            level,
            message: message.to_string(),
            pipeline: ctx.pipeline.to_string(),
            hash: self.state.hash.clone().unwrap_or_default(),
            timestamp,
        };
        let delivered = match &self.sink {
            Some(sink) => sink.log_alarm(&alarm),
            None => Err(crate::store::DeliveryError("no alarm sink".to_string())),
        };
        let duration = match delivered {
            Ok(()) => self.settings.silence_after(level),
            Err(e) => {
                tracing::error!("{}: could not deliver level {} alarm: {}", ctx.pipeline, level, e);
                self.settings.silence_duration_cant_send
            }
        };
        ctx.request(PipelineRequest::SilenceFor { duration, level });
        Ok(())
    }

    fn count_message(&mut self) {
        self.state.messages_this_level += 1;
        let level = self.current_level();
        let Some(threshold) = self.settings.escalation_threshold(level) else {
            return;
        };
        if self.state.messages_this_level > threshold {
            let cap = self.settings.max_escalation(self.base_level);
            if self.state.escalation_level < cap {
                self.state.escalation_level += 1;
                tracing::info!(
                    "Alarm escalated to level {}",
                    self.base_level + self.state.escalation_level
                );
            }
            self.state.messages_this_level = 0;
        }
    }

    /// Clear the alarm. Calling this while already clear changes nothing.
    pub fn reset_alarm(&mut self) {
        if let Some(hash) = self.state.hash.take() {
            tracing::info!("Alarm {} cleared", hash);
        }
        self.state = AlarmState::default();
        self.counted_cycle = None;
    }
}

fn default_alarm_level() -> i64 {
    0
}
