use campus_poll::Engine;
use campus_poll::config::EngineConfig;
use campus_poll::models::LifecycleEventKind;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let engine = match Engine::open(&config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to initialize poll store: {}", e);
            return;
        }
    };

    // Log lifecycle transitions as they happen
    let mut events = engine.catalog.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let what = match event.kind {
                        LifecycleEventKind::Activated => "opened for voting",
                        LifecycleEventKind::Closed => "closed",
                        LifecycleEventKind::ResultsDisclosed => "results disclosed",
                    };
                    info!("Poll {} {} ({} at {})", event.poll_id, what, event.actor, event.at.to_rfc3339());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Lifecycle log fell behind; skipped {} event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // --- Start Background Task for Poll Schedules ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::clone(&engine.scheduler);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    info!(
        "Campus poll engine running (max {} options per poll). Press Ctrl-C to stop.",
        config.max_options
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task ended abnormally: {}", e);
    }
}
