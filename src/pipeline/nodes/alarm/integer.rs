//! Alarms on integer status words.
//!
//! `IntegerAlarmNode` looks the value up in a table of exact values.
//! `BitmaskIntegerAlarmNode` tests `value & mask == target` for every entry
//! of a list of hex triples and may raise several messages in one cycle:
//!
//! ```json
//! {"alarm_values": [["0x1", "0x1", "pump tripped"], ["0x6", "0x4", "heater fault"]]}
//! ```

use super::{default_alarm_level, AlarmEvaluator, AlarmState};
use crate::pipeline::error::NodeResult;
use crate::pipeline::node::{parse_config, ConfigMap, NodeContext, NodeOutput, NodePlugin, NodeSetup};
use crate::pipeline::nodes::latest;
use crate::pipeline::packet::Package;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct IntegerAlarmConfig {
    input_var: String,
    alarm_values: BTreeMap<String, String>,
    #[serde(default = "default_alarm_level")]
    alarm_level: i64,
    #[serde(default)]
    description: String,
}

#[derive(Default)]
pub struct IntegerAlarmNode {
    input_var: String,
    description: String,
    messages: BTreeMap<i64, String>,
    alarm: AlarmEvaluator,
}

impl IntegerAlarmNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodePlugin for IntegerAlarmNode {
    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.alarm.setup(setup);
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: IntegerAlarmConfig = parse_config(config)?;
        let mut messages = BTreeMap::new();
        for (value, message) in cfg.alarm_values {
            let key = value
                .trim()
                .parse::<i64>()
                .map_err(|e| format!("alarm value '{}': {}", value, e))?;
            messages.insert(key, message);
        }
        self.description = if cfg.description.is_empty() {
            cfg.input_var.clone()
        } else {
            cfg.description
        };
        self.input_var = cfg.input_var;
        self.messages = messages;
        self.alarm.set_base_level(cfg.alarm_level);
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let package = latest(input)?;
        let value = package.get_i64(&self.input_var)?;
        match self.messages.get(&value) {
            Some(message) => {
                let message = format!("{}: {}", self.description, message);
                self.alarm.log_alarm(&message, package.time, ctx)?;
            }
            None => self.alarm.reset_alarm(),
        }
        Ok(NodeOutput::Passthrough)
    }

    fn alarm_state(&self) -> Option<&AlarmState> {
        Some(self.alarm.state())
    }
}

#[derive(Debug, Deserialize)]
struct BitmaskAlarmConfig {
    input_var: String,
    alarm_values: Vec<[String; 3]>,
    #[serde(default = "default_alarm_level")]
    alarm_level: i64,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, PartialEq)]
struct BitCheck {
    mask: u64,
    target: u64,
    message: String,
}

fn parse_hex(text: &str) -> Result<u64, String> {
    let digits = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| format!("'{}' is not hex: {}", text, e))
}

#[derive(Default)]
pub struct BitmaskIntegerAlarmNode {
    input_var: String,
    description: String,
    checks: Vec<BitCheck>,
    alarm: AlarmEvaluator,
}

impl BitmaskIntegerAlarmNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodePlugin for BitmaskIntegerAlarmNode {
    fn setup(&mut self, setup: &NodeSetup) -> NodeResult<()> {
        self.alarm.setup(setup);
        Ok(())
    }

    fn load_config(&mut self, config: &ConfigMap) -> Result<(), String> {
        let cfg: BitmaskAlarmConfig = parse_config(config)?;
        let checks = cfg
            .alarm_values
            .into_iter()
            .map(|[mask, target, message]| {
                Ok(BitCheck {
                    mask: parse_hex(&mask)?,
                    target: parse_hex(&target)?,
                    message,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        self.description = if cfg.description.is_empty() {
            cfg.input_var.clone()
        } else {
            cfg.description
        };
        self.input_var = cfg.input_var;
        self.checks = checks;
        self.alarm.set_base_level(cfg.alarm_level);
        Ok(())
    }

    fn process(&mut self, input: &[Package], ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
        let package = latest(input)?;
        // Status words are reinterpreted bit for bit
        let value = package.get_i64(&self.input_var)? as u64;
        let matched: Vec<String> = self
            .checks
            .iter()
            .filter(|c| value & c.mask == c.target)
            .map(|c| format!("{}: {}", self.description, c.message))
            .collect();
        if matched.is_empty() {
            self.alarm.reset_alarm();
        }
        for message in matched {
            self.alarm.log_alarm(&message, package.time, ctx)?;
        }
        Ok(NodeOutput::Passthrough)
    }

    fn alarm_state(&self) -> Option<&AlarmState> {
        Some(self.alarm.state())
    }
}
