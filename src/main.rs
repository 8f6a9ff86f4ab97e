use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use any_worker::config::{self, WorkerSettings};
use any_worker::{WorkerEvent, WorkerManager};

/// Workers registered when no settings file is given.
fn demo_settings() -> Vec<WorkerSettings> {
    vec![
        WorkerSettings {
            name: "heartbeat".to_string(),
            timestep_secs: 1.0,
            autostart: true,
            ..Default::default()
        },
        WorkerSettings {
            name: "poller".to_string(),
            timestep_secs: 0.5,
            autostart: true,
            enforce_rate: true,
            ..Default::default()
        },
        WorkerSettings {
            name: "warmup".to_string(),
            timestep_secs: 0.0,
            autostart: true,
            ..Default::default()
        },
    ]
}

fn log_tick(name: String) -> impl Fn(&WorkerEvent) -> bool + Send + Sync + 'static {
    move |event: &WorkerEvent| {
        info!(worker = %name, iteration = event.iteration, "tick");
        true
    }
}

const DEFAULT_REAP_SECS: u64 = 5;

/// Reclamation interval from `ANY_WORKER_REAP_SECS`, falling back to the default.
fn reap_interval_secs(raw: Option<&str>) -> u64 {
    let Some(raw) = raw else {
        return DEFAULT_REAP_SECS;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        warn!(value = %raw, "Invalid ANY_WORKER_REAP_SECS ({e}), using {DEFAULT_REAP_SECS}");
        DEFAULT_REAP_SECS
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = match std::env::var("ANY_WORKER_CONFIG") {
        Ok(path) => config::load_settings(std::path::Path::new(&path))
            .with_context(|| format!("Failed to load worker settings from {path}"))?,
        Err(_) => demo_settings(),
    };

    let reap_secs = reap_interval_secs(std::env::var("ANY_WORKER_REAP_SECS").ok().as_deref());

    eprintln!("any-worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", settings.len());
    eprintln!("   Reclaim interval: {}s", reap_secs);
    eprintln!("   Press Ctrl-C to stop.\n");

    let manager = Arc::new(WorkerManager::new());
    for s in settings {
        let name = s.name.clone();
        let options = s
            .into_options(log_tick(name.clone()))
            .with_context(|| format!("Invalid settings for worker {name}"))?;
        if let Err(e) = manager.add_worker(options) {
            warn!("Worker {name} not started: {e}");
        }
    }

    // Periodically reclaim workers whose thread has exited
    let reaper_manager = Arc::clone(&manager);
    let reaper = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(reap_secs.max(1)));
        loop {
            tick.tick().await;
            let m = Arc::clone(&reaper_manager);
            match tokio::task::spawn_blocking(move || m.clean_destructible_workers()).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Reclaimed terminated workers"),
                Err(e) => warn!("Reclaim task failed: {e}"),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    reaper.abort();

    let summary = manager.summary();
    info!(summary = %serde_json::to_string(&summary)?, "Final worker summary");

    tokio::task::spawn_blocking(move || manager.clear_workers())
        .await
        .context("Worker teardown panicked")?;

    Ok(())
}
