//! Doberman monitor - Main Entry Point
//!
//! Usage: `doberman [config.toml]`. Without an argument the config is read
//! from the platform config directory, falling back to defaults.

use anyhow::Context;
use doberman::{
    config::{default_config_path, AppConfig, LoggingSettings},
    monitor::PipelineMonitor,
    pipeline::{Collaborators, NodeRegistry},
    store::MemoryStore,
    telemetry::MemoryTelemetry,
};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let (file_layer, guard) = match &settings.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &settings.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,doberman=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => default_config_path()
            .map(AppConfig::load_or_default)
            .unwrap_or_default(),
    };
    let _log_guard = init_logging(&config.logging);

    tracing::info!("Starting Doberman monitor for {} pipelines", config.monitor.flavor);

    let store = match &config.store.path {
        Some(path) => {
            let store =
                MemoryStore::load(path).with_context(|| format!("loading store {:?}", path))?;
            if config.store.write_back {
                Arc::new(store)
            } else {
                Arc::new(store.read_only())
            }
        }
        None => {
            tracing::warn!("No store path configured, starting with an empty store");
            Arc::new(MemoryStore::new())
        }
    };

    let collaborators = Collaborators {
        store: store.clone(),
        telemetry: Arc::new(MemoryTelemetry::new()),
        alarms: store,
    };

    let monitor = Arc::new(PipelineMonitor::new(
        config.monitor,
        config.pipeline,
        collaborators,
        NodeRegistry::with_builtins(),
    ));
    monitor.run().context("monitor failed")?;

    tracing::info!("Doberman monitor exited cleanly");
    Ok(())
}
