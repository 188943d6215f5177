//! SimpleAlarmNode: threshold alarm with a recurrence requirement.
//!
//! The node keeps the last `alarm_recurrence` readings. It alarms only when
//! every one of them lies outside `alarm_thresholds`, and clears as soon as
//! the newest reading is back in range.

use super::{default_alarm_level, AlarmEvaluator, AlarmState};
use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{
    parse_config, ConfigMap, Intake, NodeContext, NodeOutput, NodePlugin, NodeSetup,
};
use crate::pipeline::nodes::{latest, series};
use crate::pipeline::packet::Package;
use serde::Deserialize;

fn default_recurrence() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct SimpleAlarmConfig {
    input_var: String,
    alarm_thresholds: [f64; 2],
    #[serde(default = "default_recurrence")]
    alarm_recurrence: usize,
    #[serde(default = "default_alarm_level")]
    alarm_level: i64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    units: String,
}

#[derive(Default)]
pub struct SimpleAlarmNode {
    input_var: String,
    low: f64,
    high: f64,
    recurrence: usize,
    description: String,
    units: String,
    alarm: AlarmEvaluator,
}

impl SimpleAlarmNode {
    pub fn new() -> Self {
        Self {
            recurrence: 1,
            ..Self::default()
        }
    }

    fn in_range(&self, value: f64) -> bool {
        (self.low..=self.high).contains(&value)
    }
}

impl NodePlugin for SimpleAlarmNode {
    fn intake(&self) -> Intake {
        Intake::Window { strict: false }
    }

    fn buffer_length(&self) -> usize {
        self.recurrence
    }

    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.alarm.setup(setup);
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: SimpleAlarmConfig = parse_config(config)?;
        let [low, high] = cfg.alarm_thresholds;
        if low > high {
            return Err(format!("alarm_thresholds [{}, {}] are inverted", low, high));
        }
        if cfg.alarm_recurrence == 0 {
            return Err("alarm_recurrence must be at least 1".to_string());
        }
        self.input_var = cfg.input_var;
        self.low = low;
        self.high = high;
        self.recurrence = cfg.alarm_recurrence;
        self.description = if cfg.description.is_empty() {
            self.input_var.clone()
        } else {
            cfg.description
        };
        self.units = cfg.units;
        self.alarm.set_base_level(cfg.alarm_level);
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let newest = latest(input)?;
        let (_, values) = series(input, &self.input_var)?;
        let current = newest.get_f64(&self.input_var)?;

        if self.in_range(current) {
            self.alarm.reset_alarm();
            return Ok(NodeOutput::Passthrough);
        }
        let persistent = values.len() >= self.recurrence
            && values
                .iter()
                .rev()
                .take(self.recurrence)
                .all(|v| !self.in_range(*v));
        if persistent {
            let message = format!(
                "{} is {:.3}{}, outside [{}, {}] for {} readings",
                self.description,
                current,
                self.units,
                self.low,
                self.high,
                self.recurrence
            );
            self.alarm.log_alarm(&message, newest.time, ctx)?;
        }
        Ok(NodeOutput::Passthrough)
    }

    fn alarm_state(&self) -> Option<&AlarmState> {
        Some(self.alarm.state())
    }
}
