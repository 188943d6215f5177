//! # Doberman: slow-control pipeline engine
//!
//! Runs alarm, control and conversion pipelines over sensor readings. A
//! pipeline is a small graph of nodes described by a document in the store;
//! a monitor process runs every pipeline of one flavor and takes commands
//! over TCP.
//!
//! ## Architecture
//!
//! - **Pipeline**: graph builder, per-cycle executor and node variants
//! - **Monitor**: periodic workers, event-driven pipeline threads and the
//!   command listener
//! - **Store / Telemetry**: collaborator traits for documents, commands,
//!   alarms and time-series data, with in-memory implementations
//! - **Scripting**: sandboxed Rhai expressions for `EvalNode`
//!
//! ## Configuration
//!
//! A monitor reads one TOML file (see [`config`]). Pipeline definitions and
//! sensor settings live in the store.
//!
//! ## Example
//!
//! ```ignore
//! use doberman::{
//!     config::AppConfig,
//!     monitor::PipelineMonitor,
//!     pipeline::{Collaborators, NodeRegistry},
//!     store::MemoryStore,
//!     telemetry::MemoryTelemetry,
//! };
//! use std::sync::Arc;
//!
//! let config = AppConfig::load("doberman.toml")?;
//! let store = Arc::new(MemoryStore::load("store.json")?);
//! let collaborators = Collaborators {
//!     store: store.clone(),
//!     telemetry: Arc::new(MemoryTelemetry::new()),
//!     alarms: store,
//! };
//! let monitor = Arc::new(PipelineMonitor::new(
//!     config.monitor,
//!     config.pipeline,
//!     collaborators,
//!     NodeRegistry::with_builtins(),
//! ));
//! monitor.run()?;
//! ```

pub mod config;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod scripting;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{DobermanError, Result};
pub use monitor::{Command, PipelineMonitor};
pub use pipeline::{Pipeline, PipelineBuilder, SyncPipeline};
pub use types::{Flavor, PipelineStatus};
