//! Monitor process: runs every pipeline of one flavor.
//!
//! # Threads
//!
//! - one [`PeriodicWorker`] per periodic pipeline, plus `heartbeat` and
//!   `checkthreads` housekeeping workers
//! - one [`SyncPipeline`](crate::pipeline::SyncPipeline) thread per
//!   event-driven pipeline
//! - one [`Listener`] accepting plain-text [`Command`]s
//!
//! Everything is tied to one [`ShutdownSignal`]; a `stop` command triggers
//! it and the monitor joins its threads with a bounded timeout.

pub mod command;
pub mod listener;
pub mod pipeline_monitor;
pub mod worker;

pub use command::{Command, CommandParseError};
pub use listener::Listener;
pub use pipeline_monitor::PipelineMonitor;
pub use worker::{join_with_timeout, PeriodicWorker, ShutdownSignal};
