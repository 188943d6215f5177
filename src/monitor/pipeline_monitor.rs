//! Supervisor for every pipeline of one flavor.
//!
//! Periodic pipelines each get a [`PeriodicWorker`] whose period is the delay
//! the last cycle asked for. Pipelines with listening sources get a
//! [`SyncPipeline`] thread and are registered under the variables they
//! listen for, so `sensor_value` commands reach them.

use super::command::Command;
use super::listener::Listener;
use super::worker::{PeriodicWorker, ShutdownSignal};
use crate::config::{MonitorSettings, PipelineSettings};
use crate::error::{DobermanError, Result};
use crate::pipeline::{
    Collaborators, NodeRegistry, Package, PipelineBuilder, PipelineStats, SyncPipeline,
    SILENCE_ALL,
};
use crate::store::fields;
use crate::types::{Flavor, PipelineStatus};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

enum Runner {
    Periodic(PeriodicWorker),
    Sync(SyncPipeline),
}

struct RunningPipeline {
    runner: Runner,
    stats: Arc<PipelineStats>,
}

impl RunningPipeline {
    /// Thread exited without being stopped.
    fn is_dead(&self) -> bool {
        match &self.runner {
            Runner::Periodic(worker) => worker.is_dead(),
            Runner::Sync(sync) => sync.is_finished() && !sync.is_stopped(),
        }
    }

    fn stop(&self) {
        match &self.runner {
            Runner::Periodic(worker) => worker.stop(),
            Runner::Sync(sync) => sync.stop(),
        }
    }

    fn is_finished(&self) -> bool {
        match &self.runner {
            Runner::Periodic(worker) => worker.is_finished(),
            Runner::Sync(sync) => sync.is_finished(),
        }
    }

    fn join(self, timeout: Duration) -> bool {
        match self.runner {
            Runner::Periodic(worker) => worker.join(timeout),
            Runner::Sync(sync) => sync.join(timeout),
        }
    }
}

pub struct PipelineMonitor {
    flavor: Flavor,
    name: String,
    settings: MonitorSettings,
    pipeline_settings: PipelineSettings,
    collaborators: Collaborators,
    registry: NodeRegistry,
    pipelines: Mutex<HashMap<String, RunningPipeline>>,
    /// Pipelines fed by each externally delivered variable.
    listeners: Mutex<HashMap<String, Vec<String>>>,
    /// Stopped pipelines whose threads have not been joined yet.
    stopping: Mutex<Vec<(String, RunningPipeline)>>,
    workers: Mutex<Vec<PeriodicWorker>>,
    shutdown: ShutdownSignal,
}

impl PipelineMonitor {
    pub fn new(
        settings: MonitorSettings,
        pipeline_settings: PipelineSettings,
        collaborators: Collaborators,
        registry: NodeRegistry,
    ) -> Self {
        Self {
            flavor: settings.flavor,
            name: settings.flavor.monitor_name(),
            settings,
            pipeline_settings,
            collaborators,
            registry,
            pipelines: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            stopping: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Names of running pipelines, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.pipelines).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.pipelines).contains_key(name)
    }

    pub fn stats(&self, name: &str) -> Option<Arc<PipelineStats>> {
        lock(&self.pipelines).get(name).map(|p| p.stats.clone())
    }

    /// Start every runnable pipeline of this flavor plus the housekeeping workers.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let names = self
            .collaborators
            .store
            .get_pipelines(self.flavor, PipelineStatus::runnable())?;
        tracing::info!("{}: starting {} pipelines", self.name, names.len());
        for name in names {
            if let Err(e) = self.start_pipeline(&name) {
                tracing::error!("{}: could not start {}: {}", self.name, name, e);
            }
        }

        let mut workers = lock(&self.workers);
        let weak = Arc::downgrade(self);
        workers.push(PeriodicWorker::spawn(
            format!("{}_heartbeat", self.name),
            self.settings.heartbeat_interval(),
            move || {
                if let Some(monitor) = weak.upgrade() {
                    monitor.heartbeat();
                }
                None
            },
        )?);
        let weak = Arc::downgrade(self);
        workers.push(PeriodicWorker::spawn(
            format!("{}_checkthreads", self.name),
            self.settings.check_threads_interval(),
            move || {
                if let Some(monitor) = weak.upgrade() {
                    monitor.check_threads();
                }
                None
            },
        )?);
        Ok(())
    }

    /// Start, listen for commands until a `stop` arrives, then shut down.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        self.start()?;

        let weak = Arc::downgrade(self);
        let listener = Listener::spawn(
            &self.settings.bind_address(),
            self.settings.accept_poll(),
            self.shutdown.clone(),
            move |command| {
                if let Some(monitor) = weak.upgrade() {
                    monitor.handle(command);
                }
            },
        )
        .map_err(|e| DobermanError::Listener(e.to_string()))?;

        while !self.shutdown.wait_timeout(Duration::from_secs(3600)) {}

        self.shutdown();
        listener.join(self.settings.join_timeout());
        Ok(())
    }

    /// Apply one command.
    pub fn handle(&self, command: Command) {
        let result = match command {
            Command::SensorValue {
                name,
                timestamp,
                value,
            } => {
                self.sensor_value(&name, timestamp, value);
                Ok(())
            }
            Command::Start(name) => self.start_command(&name),
            Command::Stop(name) => self.stop_pipeline(&name),
            Command::Restart(name) => self.restart_pipeline(&name),
            Command::Silent(name) => self.silence_pipeline(&name),
            Command::Active(name) => self.activate_pipeline(&name),
            Command::Shutdown => {
                tracing::info!("{}: stop requested", self.name);
                self.shutdown.trigger();
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!("{}: {}", self.name, e);
        }
    }

    /// Build and launch `name`. Already running pipelines are left alone.
    pub fn start_pipeline(&self, name: &str) -> Result<()> {
        if Flavor::of_pipeline(name) != Some(self.flavor) {
            return Err(DobermanError::Config(format!(
                "'{}' is not a {} pipeline",
                name, self.flavor
            )));
        }

        let mut pipelines = lock(&self.pipelines);
        if pipelines.contains_key(name) {
            tracing::debug!("{}: {} already running", self.name, name);
            return Ok(());
        }

        let pipeline = PipelineBuilder::new(&self.registry, self.collaborators.clone())
            .with_settings(self.pipeline_settings)
            .build_named(name)?;
        let stats = pipeline.stats();

        let runner = if pipeline.is_sync() {
            let sync = SyncPipeline::spawn(pipeline)?;
            let mut listeners = lock(&self.listeners);
            for var in sync.listeners() {
                listeners.entry(var.clone()).or_default().push(name.to_string());
            }
            Runner::Sync(sync)
        } else {
            let period = secs(pipeline.period());
            let mut pipeline = pipeline;
            Runner::Periodic(PeriodicWorker::spawn(format!("pl_{}", name), period, move || {
                Some(secs(pipeline.process_cycle()))
            })?)
        };

        tracing::info!("{}: started {}", self.name, name);
        pipelines.insert(name.to_string(), RunningPipeline { runner, stats });
        Ok(())
    }

    /// Stop `name` and mark it inactive.
    pub fn stop_pipeline(&self, name: &str) -> Result<()> {
        self.halt(name);
        self.collaborators
            .store
            .set_pipeline_value(name, &fields([("status", json!(PipelineStatus::Inactive))]))?;
        Ok(())
    }

    pub fn restart_pipeline(&self, name: &str) -> Result<()> {
        self.halt(name);
        self.start_pipeline(name)
    }

    /// Silence `name` at every level until it is activated again.
    pub fn silence_pipeline(&self, name: &str) -> Result<()> {
        tracing::info!("{}: silencing {}", self.name, name);
        self.collaborators.store.set_pipeline_value(
            name,
            &fields([
                ("status", json!(PipelineStatus::Silent)),
                ("silent_until", json!(-1)),
                ("silenced_at_level", json!(SILENCE_ALL)),
            ]),
        )?;
        Ok(())
    }

    pub fn activate_pipeline(&self, name: &str) -> Result<()> {
        tracing::info!("{}: activating {}", self.name, name);
        self.collaborators.store.set_pipeline_value(
            name,
            &fields([
                ("status", json!(PipelineStatus::Active)),
                ("silent_until", json!(-1)),
                ("silenced_at_level", json!(-1)),
            ]),
        )?;
        Ok(())
    }

    /// Forward an injected reading to every pipeline listening for it.
    pub fn sensor_value(&self, name: &str, timestamp: f64, value: Option<f64>) {
        let targets = lock(&self.listeners).get(name).cloned().unwrap_or_default();
        if targets.is_empty() {
            tracing::trace!("{}: no pipeline listens for {}", self.name, name);
            return;
        }
        let pipelines = lock(&self.pipelines);
        for target in targets {
            if let Some(RunningPipeline {
                runner: Runner::Sync(sync),
                ..
            }) = pipelines.get(&target)
            {
                sync.receive_from_upstream(name, Package::new(timestamp).with(name, value));
            }
        }
    }

    pub fn heartbeat(&self) {
        let store = &self.collaborators.store;
        if let Err(e) = store.update_heartbeat(&self.name).and_then(|_| store.flush()) {
            tracing::warn!("{}: heartbeat failed: {}", self.name, e);
        }
    }

    /// Restart pipelines whose thread died without being stopped.
    pub fn check_threads(&self) {
        self.reap_stopped();
        let dead: Vec<String> = lock(&self.pipelines)
            .iter()
            .filter(|(_, p)| p.is_dead())
            .map(|(name, _)| name.clone())
            .collect();
        for name in dead {
            tracing::warn!("{}: {} died, restarting", self.name, name);
            if let Err(e) = self.restart_pipeline(&name) {
                tracing::error!("{}: could not restart {}: {}", self.name, name, e);
            }
        }
    }

    /// Stop every pipeline and worker. Persisted statuses are left as they are.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        for name in self.running() {
            self.halt(&name);
        }
        let stopping: Vec<(String, RunningPipeline)> = lock(&self.stopping).drain(..).collect();
        for (_, running) in stopping {
            running.join(self.settings.join_timeout());
        }
        let workers: Vec<PeriodicWorker> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            worker.join(self.settings.join_timeout());
        }
        tracing::info!("{}: shut down", self.name);
    }

    fn start_command(&self, name: &str) -> Result<()> {
        let doc = self.collaborators.store.get_pipeline(name)?;
        if doc.status == PipelineStatus::Inactive {
            self.activate_pipeline(name)?;
        }
        self.start_pipeline(name)
    }

    /// Signal the thread of `name` to stop without touching its document.
    /// The thread is joined later by `check_threads` or `shutdown`.
    fn halt(&self, name: &str) {
        let Some(running) = lock(&self.pipelines).remove(name) else {
            tracing::debug!("{}: {} is not running", self.name, name);
            return;
        };
        lock(&self.listeners).retain(|_, targets| {
            targets.retain(|t| t != name);
            !targets.is_empty()
        });
        running.stop();
        lock(&self.stopping).push((name.to_string(), running));
        tracing::info!("{}: stopping {}", self.name, name);
    }

    /// Join stopped pipelines whose threads have exited.
    fn reap_stopped(&self) {
        let finished: Vec<(String, RunningPipeline)> = {
            let mut stopping = lock(&self.stopping);
            let (finished, pending): (Vec<_>, Vec<_>) =
                stopping.drain(..).partition(|(_, p)| p.is_finished());
            *stopping = pending;
            finished
        };
        for (name, running) in finished {
            running.join(Duration::ZERO);
            tracing::debug!("{}: joined {}", self.name, name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        ConfigMap, Intake, NodeContext, NodeOutput, NodePlugin, NodeResult, TimeBuffer,
    };
    use crate::store::{MemoryStore, PipelineDoc, Store};
    use crate::telemetry::MemoryTelemetry;

    fn monitor(store: &Arc<MemoryStore>) -> Arc<PipelineMonitor> {
        monitor_with(store, NodeRegistry::with_builtins())
    }

    fn monitor_with(store: &Arc<MemoryStore>, registry: NodeRegistry) -> Arc<PipelineMonitor> {
        let collaborators = Collaborators {
            store: store.clone(),
            telemetry: Arc::new(MemoryTelemetry::new()),
            alarms: store.clone(),
        };
        Arc::new(PipelineMonitor::new(
            MonitorSettings::default(),
            PipelineSettings::default(),
            collaborators,
            registry,
        ))
    }

    /// Source whose every read takes a full second.
    struct SlowSource;

    impl NodePlugin for SlowSource {
        fn intake(&self) -> Intake {
            Intake::Source
        }

        fn load_config(&mut self, _config: &ConfigMap) -> std::result::Result<(), String> {
            Ok(())
        }

        fn read_source(
            &mut self,
            _buffer: &mut TimeBuffer,
            ctx: &mut NodeContext,
        ) -> NodeResult<Package> {
            std::thread::sleep(Duration::from_secs(1));
            Ok(Package::new(ctx.now))
        }

        fn process(&mut self, _input: &[Package], _ctx: &mut NodeContext) -> NodeResult<NodeOutput> {
            Ok(NodeOutput::Passthrough)
        }
    }

    fn sync_doc(name: &str, status: PipelineStatus) -> PipelineDoc {
        let mut doc: PipelineDoc = serde_json::from_value(json!({
            "name": name,
            "pipeline": [{"name": "src", "type": "SensorSourceNode", "input_var": "T1"}]
        }))
        .unwrap();
        doc.status = status;
        doc
    }

    #[test]
    fn test_silent_then_active_round_trips() {
        let store = Arc::new(MemoryStore::new());
        store.insert_pipeline(sync_doc("alarm_x", PipelineStatus::Active)).unwrap();
        let monitor = monitor(&store);

        monitor.handle(Command::Silent("alarm_x".into()));
        let doc = store.get_pipeline("alarm_x").unwrap();
        assert_eq!(doc.status, PipelineStatus::Silent);
        assert_eq!(doc.silenced_at_level, SILENCE_ALL);

        monitor.handle(Command::Active("alarm_x".into()));
        let doc = store.get_pipeline("alarm_x").unwrap();
        assert_eq!(doc.status, PipelineStatus::Active);
        assert_eq!(doc.silenced_at_level, -1);
        assert_eq!(doc.silent_until, -1.0);
    }

    #[test]
    fn test_start_registers_listeners_and_stop_deactivates() {
        let store = Arc::new(MemoryStore::new());
        store.insert_pipeline(sync_doc("alarm_x", PipelineStatus::Inactive)).unwrap();
        let monitor = monitor(&store);

        monitor.handle(Command::Start("alarm_x".into()));
        assert!(monitor.is_running("alarm_x"));
        assert_eq!(store.get_pipeline("alarm_x").unwrap().status, PipelineStatus::Active);
        assert_eq!(lock(&monitor.listeners)["T1"], vec!["alarm_x".to_string()]);

        monitor.handle(Command::Stop("alarm_x".into()));
        assert!(!monitor.is_running("alarm_x"));
        assert!(lock(&monitor.listeners).is_empty());
        assert_eq!(store.get_pipeline("alarm_x").unwrap().status, PipelineStatus::Inactive);
    }

    #[test]
    fn test_stop_does_not_wait_for_a_busy_cycle() {
        let store = Arc::new(MemoryStore::new());
        let mut slow = PipelineDoc::new("alarm_slow");
        slow.pipeline =
            serde_json::from_value(json!([{"name": "s", "type": "SlowSource"}])).unwrap();
        store.insert_pipeline(slow).unwrap();
        store.insert_pipeline(sync_doc("alarm_x", PipelineStatus::Active)).unwrap();
        let mut registry = NodeRegistry::with_builtins();
        registry.register("SlowSource", || Box::new(SlowSource)).unwrap();
        let monitor = monitor_with(&store, registry);

        monitor.start_pipeline("alarm_slow").unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let started = std::time::Instant::now();
        monitor.handle(Command::Stop("alarm_slow".into()));
        monitor.handle(Command::Silent("alarm_x".into()));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!monitor.is_running("alarm_slow"));
        assert_eq!(store.get_pipeline("alarm_x").unwrap().status, PipelineStatus::Silent);
        assert_eq!(lock(&monitor.stopping).len(), 1);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !lock(&monitor.stopping).is_empty() && std::time::Instant::now() < deadline {
            monitor.check_threads();
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(lock(&monitor.stopping).is_empty());
        assert!(monitor.running().is_empty());
    }

    #[test]
    fn test_rejects_other_flavor_and_bad_builds() {
        let store = Arc::new(MemoryStore::new());
        store.insert_pipeline(sync_doc("control_x", PipelineStatus::Active)).unwrap();
        let mut broken = PipelineDoc::new("alarm_broken");
        broken.pipeline = serde_json::from_value(json!([
            {"name": "a", "type": "MergeNode", "upstream": ["b"]},
            {"name": "b", "type": "MergeNode", "upstream": ["a"]}
        ]))
        .unwrap();
        store.insert_pipeline(broken).unwrap();
        let monitor = monitor(&store);

        assert!(monitor.start_pipeline("control_x").is_err());
        assert!(matches!(
            monitor.start_pipeline("alarm_broken"),
            Err(DobermanError::Pipeline(_))
        ));
        assert!(monitor.running().is_empty());
    }

    #[test]
    fn test_shutdown_command_triggers_signal() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(&store);
        monitor.handle(Command::Shutdown);
        assert!(monitor.shutdown_signal().is_triggered());
    }
}
