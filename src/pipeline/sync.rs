//! Event-driven pipeline: one cycle per quorum of fresh inputs.
//!
//! The pipeline moves onto its own thread, parked on a condition variable.
//! It wakes when every required input has arrived since the last cycle, or
//! on any arrival when nothing is required. Packages are handed to the
//! listening nodes in arrival order right before the cycle runs.
//!
//! If no quorum forms within the pipeline's period, the thread still runs a
//! cycle when the pipeline has optional listeners, so detectors that watch
//! for missing data get to see the silence.
//!
//! While waiting, each variable keeps at most as many queued packages as its
//! listening buffer holds; older ones are dropped as newer ones arrive.

use crate::monitor::worker::join_with_timeout;
use crate::pipeline::executor::{Pipeline, PipelineStats};
use crate::pipeline::packet::Package;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Default)]
struct SyncState {
    arrived: HashSet<String>,
    inbox: Vec<(String, Package)>,
    capacity: HashMap<String, usize>,
    shutdown: bool,
}

impl SyncState {
    fn queue(&mut self, var: &str, package: Package) {
        let capacity = self.capacity.get(var).copied().unwrap_or(1);
        let queued = self.inbox.iter().filter(|(v, _)| v == var).count();
        if queued >= capacity {
            if let Some(oldest) = self.inbox.iter().position(|(v, _)| v == var) {
                self.inbox.remove(oldest);
            }
        }
        self.arrived.insert(var.to_string());
        self.inbox.push((var.to_string(), package));
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<SyncState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to a pipeline running on its own event-driven thread.
pub struct SyncPipeline {
    name: String,
    listeners: Vec<String>,
    shared: Arc<Shared>,
    stats: Arc<PipelineStats>,
    handle: Option<JoinHandle<()>>,
}

impl SyncPipeline {
    pub fn spawn(pipeline: Pipeline) -> std::io::Result<Self> {
        let name = pipeline.name().to_string();
        let listeners = pipeline.listeners();
        let stats = pipeline.stats();
        let shared = Arc::new(Shared::default());
        shared.lock().capacity = pipeline.listener_capacity();

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("sync_{}", name))
            .spawn(move || run(pipeline, &thread_shared))?;

        Ok(Self {
            name,
            listeners,
            shared,
            stats,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variables this pipeline accepts from outside.
    pub fn listeners(&self) -> &[String] {
        &self.listeners
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Queue an externally delivered value and wake the pipeline thread.
    pub fn receive_from_upstream(&self, var: &str, package: Package) {
        self.shared.lock().queue(var, package);
        self.shared.wake.notify_one();
    }

    pub fn stop(&self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().shutdown
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop and wait up to `timeout` for the thread to exit.
    pub fn join(mut self, timeout: Duration) -> bool {
        self.stop();
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, &self.name, timeout),
            None => true,
        }
    }
}

fn quorum(state: &SyncState, required: &HashSet<String>) -> bool {
    if required.is_empty() {
        !state.arrived.is_empty()
    } else {
        required.is_subset(&state.arrived)
    }
}

fn run(mut pipeline: Pipeline, shared: &Shared) {
    let required: HashSet<String> = pipeline.required_inputs().into_iter().collect();
    let poll_when_idle = pipeline.has_optional_inputs();
    let mut delay = pipeline.period();
    tracing::info!(
        "{}: waiting for {:?}",
        pipeline.name(),
        required.iter().collect::<Vec<_>>()
    );

    loop {
        let deadline = Instant::now() + Duration::from_secs_f64(delay.max(0.0));
        let mut state = shared.lock();
        let timed_out = loop {
            if state.shutdown || quorum(&state, &required) {
                break false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break true;
            }
            state = match shared.wake.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        };

        if state.shutdown {
            break;
        }
        if timed_out && !poll_when_idle {
            continue;
        }

        let inbox = std::mem::take(&mut state.inbox);
        state.arrived.clear();
        drop(state);

        for (var, package) in inbox {
            pipeline.deliver(&var, package);
        }
        delay = pipeline.process_cycle();
        shared.lock().capacity = pipeline.listener_capacity();
    }
    tracing::info!("{}: stopped after {} cycles", pipeline.name(), pipeline.cycles());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::builder::PipelineBuilder;
    use crate::pipeline::node::Collaborators;
    use crate::pipeline::registry::NodeRegistry;
    use crate::store::{MemoryStore, PipelineDoc, Store};
    use crate::telemetry::MemoryTelemetry;
    use serde_json::json;

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn spawn(store: &Arc<MemoryStore>, doc: serde_json::Value) -> SyncPipeline {
        let doc: PipelineDoc = serde_json::from_value(doc).unwrap();
        store.insert_pipeline(doc.clone()).unwrap();
        let collaborators = Collaborators {
            store: store.clone(),
            telemetry: Arc::new(MemoryTelemetry::new()),
            alarms: store.clone(),
        };
        let registry = NodeRegistry::with_builtins();
        let pipeline = PipelineBuilder::new(&registry, collaborators).build(doc).unwrap();
        SyncPipeline::spawn(pipeline).unwrap()
    }

    #[test]
    fn test_waits_for_every_required_input() {
        let store = Arc::new(MemoryStore::new());
        let sync = spawn(
            &store,
            json!({
                "name": "convert_pair",
                "status": "active",
                "pipeline": [
                    {"name": "a", "type": "SensorSourceNode", "input_var": "A"},
                    {"name": "b", "type": "SensorSourceNode", "input_var": "B"},
                    {"name": "m", "type": "MergeNode", "upstream": ["a", "b"]}
                ]
            }),
        );
        let stats = sync.stats();

        sync.receive_from_upstream("A", Package::new(1.0).with("A", 1.0));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(stats.cycles(), 0);

        sync.receive_from_upstream("B", Package::new(1.0).with("B", 2.0));
        assert!(wait_for(|| stats.cycles() == 1));
        assert_eq!(store.get_pipeline("convert_pair").unwrap().error, -1);
        assert!(sync.join(Duration::from_secs(5)));
    }

    #[test]
    fn test_missing_input_keeps_inbox_bounded() {
        let store = Arc::new(MemoryStore::new());
        let sync = spawn(
            &store,
            json!({
                "name": "convert_stalled",
                "status": "active",
                "pipeline": [
                    {"name": "a", "type": "SensorSourceNode", "input_var": "A"},
                    {"name": "b", "type": "SensorSourceNode", "input_var": "B"},
                    {"name": "m", "type": "MergeNode", "upstream": ["a", "b"]}
                ]
            }),
        );
        let stats = sync.stats();

        for i in 0..10_000 {
            let t = f64::from(i);
            sync.receive_from_upstream("A", Package::new(t).with("A", t));
        }
        {
            let state = sync.shared.lock();
            assert_eq!(state.inbox.len(), 1);
            assert_eq!(state.inbox[0].1.time, 9_999.0);
        }
        assert_eq!(stats.cycles(), 0);

        sync.receive_from_upstream("B", Package::new(10_000.0).with("B", 1.0));
        assert!(wait_for(|| stats.cycles() == 1));
        assert!(sync.shared.lock().inbox.is_empty());
        assert!(sync.join(Duration::from_secs(5)));
    }

    #[test]
    fn test_stop_wakes_idle_thread() {
        let store = Arc::new(MemoryStore::new());
        let sync = spawn(
            &store,
            json!({
                "name": "alarm_idle",
                "pipeline": [{"name": "a", "type": "SensorSourceNode", "input_var": "A"}]
            }),
        );
        assert_eq!(sync.listeners(), ["A".to_string()]);
        sync.stop();
        assert!(sync.is_stopped());
        assert!(wait_for(|| sync.is_finished()));
        assert_eq!(sync.stats().cycles(), 0);
    }
}
