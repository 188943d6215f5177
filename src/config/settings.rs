//! Section types of the application configuration
//!
//! # Main Types
//!
//! - [`MonitorSettings`] - Which flavor this process supervises, where it listens,
//!   and how often its housekeeping tasks run
//! - [`StoreSettings`] - Location of the document store file
//! - [`LoggingSettings`] - Optional rolling log file
//! - [`PipelineSettings`] - Cycle timing used by every pipeline the monitor runs

use crate::types::Flavor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Monitor process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Pipeline flavor this monitor runs
    pub flavor: Flavor,

    /// Address the command listener binds to
    pub listen_address: String,

    /// Command listener port
    pub port: u16,

    /// Seconds between heartbeats
    pub heartbeat_period: f64,

    /// Seconds between dead-worker checks
    pub check_threads_period: f64,

    /// Seconds to wait for each worker thread on shutdown
    pub join_timeout: f64,

    /// Accept-poll interval of the listener, in milliseconds
    pub accept_poll_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            flavor: Flavor::Alarm,
            listen_address: "127.0.0.1".to_string(),
            port: 8910,
            heartbeat_period: 30.0,
            check_threads_period: 30.0,
            join_timeout: 5.0,
            accept_poll_ms: 100,
        }
    }
}

impl MonitorSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        secs(self.heartbeat_period)
    }

    pub fn check_threads_interval(&self) -> Duration {
        secs(self.check_threads_period)
    }

    pub fn join_timeout(&self) -> Duration {
        secs(self.join_timeout)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }
}

/// Document store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// JSON file holding pipelines, sensors and experiment config.
    /// An empty in-memory store is used when unset.
    pub path: Option<PathBuf>,

    /// Write runtime fields back to `path` on every heartbeat
    pub write_back: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory for daily-rolling log files. Console only when unset.
    pub directory: Option<PathBuf>,

    /// Log file name prefix
    pub file_prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "doberman.log".to_string(),
        }
    }
}

/// Pipeline cycle timing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Cycle period in seconds when no dependency reports a readout interval
    pub default_period: f64,

    /// Drift added to every cycle delay, in seconds
    pub min_drift: f64,

    /// Fraction of the slowest readout interval added after a source failed
    pub source_failure_drift: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_period: 5.0,
            min_drift: 0.001,
            source_failure_drift: 0.1,
        }
    }
}

impl PipelineSettings {
    /// Delay before the next cycle, given the slowest readout interval.
    pub fn next_delay(&self, slowest_readout: Option<f64>, source_failed: bool) -> f64 {
        let base = slowest_readout.unwrap_or(self.default_period);
        let drift = if source_failed {
            (base * self.source_failure_drift).max(self.min_drift)
        } else {
            self.min_drift
        };
        base + drift
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}
