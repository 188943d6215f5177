//! Core shared types for Doberman
//!
//! # Main Types
//!
//! - [`Flavor`] - Which kind of pipelines a monitor supervises (alarm, control, convert)
//! - [`PipelineStatus`] - Persisted run state of a pipeline
//! - [`now_secs`] - Wall-clock timestamp in seconds, the unit every package uses
//!
//! Pipeline names carry their flavor as a prefix (`alarm_cryostat`,
//! `control_ln2_valve`), and the monitor that runs them is `pl_<flavor>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seconds since the Unix epoch, with sub-second precision.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Kind of pipeline a monitor owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[default]
    Alarm,
    Control,
    Convert,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Alarm => "alarm",
            Flavor::Control => "control",
            Flavor::Convert => "convert",
        }
    }

    /// Name of the monitor that runs pipelines of this flavor.
    pub fn monitor_name(&self) -> String {
        format!("pl_{}", self.as_str())
    }

    /// Infer the flavor from a pipeline name prefix.
    pub fn of_pipeline(name: &str) -> Option<Flavor> {
        let prefix = name.split('_').next()?;
        prefix.parse().ok()
    }

    pub fn all() -> &'static [Flavor] {
        &[Flavor::Alarm, Flavor::Control, Flavor::Convert]
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alarm" => Ok(Flavor::Alarm),
            "control" => Ok(Flavor::Control),
            "convert" => Ok(Flavor::Convert),
            other => Err(format!("unknown flavor '{}'", other)),
        }
    }
}

/// Persisted run state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Active,
    Silent,
    #[default]
    Inactive,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Active => "active",
            PipelineStatus::Silent => "silent",
            PipelineStatus::Inactive => "inactive",
        }
    }

    /// Statuses that a monitor starts on boot.
    pub fn runnable() -> &'static [PipelineStatus] {
        &[PipelineStatus::Active, PipelineStatus::Silent]
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
