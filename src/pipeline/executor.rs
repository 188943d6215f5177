//! Pipeline executor: one cycle over every subpipeline.
//!
//! Each cycle:
//! 1. Reload the pipeline document and the sensor settings it depends on.
//! 2. Lift an expired automatic silence and reconfigure every node.
//! 3. Run each subpipeline in order, fanning every output out downstream.
//!    The first failure aborts the rest of that subpipeline only.
//! 4. Persist heartbeat, cycle count, last error and timing.
//!
//! The owner decides when the next cycle runs; `process_cycle` returns the
//! delay it wants.

use crate::config::PipelineSettings;
use crate::pipeline::builder::config_sections;
use crate::pipeline::compiled_plan::CompiledPlan;
use crate::pipeline::error::PipelineError;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{
    sensor_overlay, Listen, Node, NodeContext, PipelineRequest, SilenceState,
};
use crate::pipeline::packet::Package;
use crate::store::{fields, PipelineDoc, SensorDoc, Store};
use crate::types::{now_secs, PipelineStatus};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters written by the pipeline's own thread, readable from anywhere.
#[derive(Debug)]
pub struct PipelineStats {
    cycles: AtomicU64,
    last_error: AtomicI64,
    rate_us: AtomicU64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            last_error: AtomicI64::new(-1),
            rate_us: AtomicU64::new(0),
        }
    }
}

impl PipelineStats {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Cycle index of the most recent node failure, or -1.
    pub fn last_error(&self) -> i64 {
        self.last_error.load(Ordering::Relaxed)
    }

    /// Node processing time of the last cycle, in milliseconds.
    pub fn rate_ms(&self) -> f64 {
        self.rate_us.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// A built pipeline and its runtime state.
pub struct Pipeline {
    name: String,
    /// Last successfully read pipeline document.
    doc: PipelineDoc,
    nodes: Vec<Node>,
    plan: CompiledPlan,
    sensors: HashMap<String, SensorDoc>,
    store: Arc<dyn Store>,
    settings: PipelineSettings,
    startup_cycles: u64,
    cycles: u64,
    last_error: i64,
    /// Listening nodes by the variable they are fed.
    listeners: HashMap<String, Vec<NodeId>>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        doc: PipelineDoc,
        nodes: Vec<Node>,
        plan: CompiledPlan,
        sensors: HashMap<String, SensorDoc>,
        store: Arc<dyn Store>,
        settings: PipelineSettings,
        startup_cycles: u64,
    ) -> Self {
        let mut listeners: HashMap<String, Vec<NodeId>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if node.listen() == Listen::No {
                continue;
            }
            if let Some(var) = &node.input_var {
                listeners.entry(var.clone()).or_default().push(NodeId::from(i));
            }
        }

        Self {
            name: doc.name.clone(),
            doc,
            nodes,
            plan,
            sensors,
            store,
            settings,
            startup_cycles,
            cycles: 0,
            last_error: -1,
            listeners,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn plan(&self) -> &CompiledPlan {
        &self.plan
    }

    pub fn doc(&self) -> &PipelineDoc {
        &self.doc
    }

    pub fn startup_cycles(&self) -> u64 {
        self.startup_cycles
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Variables fed into this pipeline from outside.
    pub fn listeners(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.listeners.keys().collect();
        names.into_iter().cloned().collect()
    }

    /// Variables that must all arrive before an event-driven cycle runs.
    pub fn required_inputs(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .nodes
            .iter()
            .filter(|n| n.listen() == Listen::Required)
            .filter_map(|n| n.input_var.as_ref())
            .collect();
        names.into_iter().cloned().collect()
    }

    /// Packages each listened variable can hold: the longest listening buffer.
    pub fn listener_capacity(&self) -> HashMap<String, usize> {
        self.listeners
            .iter()
            .map(|(var, ids)| {
                let capacity = ids
                    .iter()
                    .map(|id| self.nodes[id.index()].buffer().length())
                    .max()
                    .unwrap_or(1);
                (var.clone(), capacity.max(1))
            })
            .collect()
    }

    /// Whether any node is fed by optional external values.
    pub fn has_optional_inputs(&self) -> bool {
        self.nodes.iter().any(|n| n.listen() == Listen::Optional)
    }

    /// Event-driven pipelines are fed from outside instead of polling.
    pub fn is_sync(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Silence currently persisted for this pipeline.
    pub fn silence(&self) -> SilenceState {
        match self.doc.status {
            PipelineStatus::Silent => SilenceState {
                is_silent: true,
                silenced_at_level: self.doc.silenced_at_level,
            },
            _ => SilenceState::ACTIVE,
        }
    }

    /// Hand an externally delivered package to every node listening for `var`.
    pub fn deliver(&mut self, var: &str, package: Package) {
        let Some(ids) = self.listeners.get(var) else {
            tracing::trace!("{}: nobody listens for {}", self.name, var);
            return;
        };
        for id in ids {
            self.nodes[id.index()].receive(package.clone());
        }
    }

    /// Delay before the next cycle when nothing failed.
    pub fn period(&self) -> f64 {
        self.next_delay(false)
    }

    pub fn process_cycle(&mut self) -> f64 {
        self.process_cycle_at(now_secs())
    }

    /// Run one cycle with `now` as the wall-clock time.
    pub fn process_cycle_at(&mut self, now: f64) -> f64 {
        self.reload(now);

        let warming_up = self.cycles < self.startup_cycles;
        let mut node_time = Duration::ZERO;
        let mut failed = false;
        let mut source_failed = false;

        for sub in 0..self.plan.subpipelines.len() {
            for step in 0..self.plan.subpipelines[sub].len() {
                let id = self.plan.subpipelines[sub][step];
                let silence = if warming_up {
                    SilenceState::fully_silent()
                } else {
                    self.silence()
                };

                let mut requests = Vec::new();
                let started = Instant::now();
                let result = {
                    let mut ctx = NodeContext {
                        pipeline: &self.name,
                        cycle: self.cycles,
                        now,
                        silence,
                        requests: &mut requests,
                    };
                    self.nodes[id.index()].run(&mut ctx)
                };
                node_time += started.elapsed();
                self.apply_requests(requests, now);

                match result {
                    Ok(package) => {
                        let downstream = self.nodes[id.index()].downstream.clone();
                        for next in downstream {
                            self.nodes[next.index()].receive(package.clone());
                        }
                    }
                    Err(source) => {
                        failed = true;
                        source_failed |= self.nodes[id.index()].is_source();
                        let err = PipelineError::NodeProcess {
                            node: self.nodes[id.index()].name.clone(),
                            source,
                        };
                        if warming_up {
                            tracing::debug!("{} (warm-up cycle {}): {}", self.name, self.cycles, err);
                        } else {
                            tracing::warn!("{} cycle {}: {}", self.name, self.cycles, err);
                        }
                        self.abort_subpipeline(sub, now, silence);
                        break;
                    }
                }
            }
        }

        if failed {
            self.last_error = self.cycles as i64;
        }
        self.cycles += 1;
        self.record(now, node_time);
        self.next_delay(source_failed)
    }

    /// Silence alarms at or below `level` for `duration` seconds.
    pub fn silence_for(&mut self, duration: f64, level: i64) {
        self.silence_for_at(duration, level, now_secs());
    }

    fn silence_for_at(&mut self, duration: f64, level: i64, now: f64) {
        let current = self.silence();
        if current.is_silent && current.silenced_at_level > level {
            tracing::debug!(
                "{}: already silent at level {}, ignoring silence at {}",
                self.name,
                current.silenced_at_level,
                level
            );
            return;
        }
        let until = now + duration;
        tracing::info!("{}: silenced at level {} for {:.0} s", self.name, level, duration);
        self.doc.status = PipelineStatus::Silent;
        self.doc.silent_until = until;
        self.doc.silenced_at_level = level;
        self.persist(&fields([
            ("status", json!(PipelineStatus::Silent)),
            ("silent_until", json!(until)),
            ("silenced_at_level", json!(level)),
        ]));
    }

    fn apply_requests(&mut self, requests: Vec<PipelineRequest>, now: f64) {
        for request in requests {
            match request {
                PipelineRequest::SilenceFor { duration, level } => {
                    self.silence_for_at(duration, level, now)
                }
            }
        }
    }

    fn abort_subpipeline(&mut self, sub: usize, now: f64, silence: SilenceState) {
        let mut requests = Vec::new();
        for step in 0..self.plan.subpipelines[sub].len() {
            let id = self.plan.subpipelines[sub][step];
            let mut ctx = NodeContext {
                pipeline: &self.name,
                cycle: self.cycles,
                now,
                silence,
                requests: &mut requests,
            };
            self.nodes[id.index()].on_error_do_this(&mut ctx);
        }
        self.apply_requests(requests, now);
    }

    fn reload(&mut self, now: f64) {
        match self.store.get_pipeline(&self.name) {
            Ok(doc) => self.doc = doc,
            Err(e) => tracing::warn!("{}: keeping cached document: {}", self.name, e),
        }

        let names: Vec<String> = self.sensors.keys().cloned().collect();
        for name in names {
            match self.store.get_sensor_setting(&name) {
                Ok(sensor) => {
                    self.sensors.insert(name, sensor);
                }
                Err(e) => tracing::warn!("{}: keeping settings of {}: {}", self.name, name, e),
            }
        }

        self.lift_expired_silence(now);
        self.reconfigure();
    }

    fn lift_expired_silence(&mut self, now: f64) {
        let doc = &mut self.doc;
        if doc.status != PipelineStatus::Silent || doc.silent_until <= 0.0 || doc.silent_until > now {
            return;
        }
        tracing::info!("{}: silence expired", self.name);
        doc.status = PipelineStatus::Active;
        doc.silent_until = -1.0;
        doc.silenced_at_level = -1;
        self.persist(&fields([
            ("status", json!(PipelineStatus::Active)),
            ("silent_until", json!(-1)),
            ("silenced_at_level", json!(-1)),
        ]));
    }

    fn reconfigure(&mut self) {
        for node in self.nodes.iter_mut() {
            let (general, specific) = config_sections(&self.doc, &node.name);
            let sensor = node
                .input_var
                .as_ref()
                .and_then(|v| self.sensors.get(v))
                .map(sensor_overlay);
            if let Err(e) = node.load_config(general, specific, sensor.as_ref()) {
                tracing::warn!(
                    "{}: keeping last config of '{}': {}",
                    self.name,
                    node.name,
                    e
                );
            }
        }
    }

    fn record(&mut self, now: f64, node_time: Duration) {
        let rate_ms = node_time.as_secs_f64() * 1000.0;
        self.stats.cycles.store(self.cycles, Ordering::Relaxed);
        self.stats.last_error.store(self.last_error, Ordering::Relaxed);
        self.stats
            .rate_us
            .store(node_time.as_micros() as u64, Ordering::Relaxed);
        self.persist(&fields([
            ("heartbeat", json!(now)),
            ("cycles", json!(self.cycles)),
            ("error", json!(self.last_error)),
            ("rate", json!(rate_ms)),
        ]));
    }

    fn persist(&self, values: &[(String, serde_json::Value)]) {
        if let Err(e) = self.store.set_pipeline_value(&self.name, values) {
            tracing::warn!("{}: could not persist state: {}", self.name, e);
        }
    }

    fn next_delay(&self, source_failed: bool) -> f64 {
        let slowest = self
            .doc
            .depends_on
            .iter()
            .filter_map(|name| self.sensors.get(name))
            .map(|s| s.readout_interval)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        self.settings.next_delay(slowest, source_failed)
    }
}
