//! jobwired — job worker daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use jobwire_core::config::WorkerConfig;
use jobwire_services::{ProcessCanceller, ProcessExecutor};
use jobwired::Worker;

/// How long tasks get to stop after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = WorkerConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = WorkerConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        WorkerConfig::default()
    });

    if let Some(address) = std::env::args().nth(1) {
        config.controller.address = address;
    }
    tracing::info!(controller = %config.controller.address, "jobwired starting");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let worker = Worker::start(
        &config,
        Arc::new(ProcessExecutor),
        Arc::new(ProcessCanceller),
        &shutdown_tx,
    );

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut session_task = worker.session_task;
    let mut drain_task = worker.drain_task;
    let mut session_done = false;
    let mut drain_done = false;

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = &mut session_task   => {
            session_done = true;
            tracing::error!("controller session exited: {:?}", r);
        }
        r = &mut drain_task     => {
            drain_done = true;
            tracing::error!("drain loop exited: {:?}", r);
        }
    }

    // Stop whichever task is still running and let both finish.
    let _ = shutdown_tx.send(());
    let stopped = tokio::time::timeout(SHUTDOWN_GRACE, async {
        if !session_done {
            if let Err(e) = (&mut session_task).await {
                tracing::warn!(error = %e, "controller session did not stop cleanly");
            }
        }
        if !drain_done {
            if let Err(e) = (&mut drain_task).await {
                tracing::warn!(error = %e, "drain loop did not stop cleanly");
            }
        }
    })
    .await;
    if stopped.is_err() {
        tracing::warn!(grace = ?SHUTDOWN_GRACE, "tasks still running at shutdown");
    }

    Ok(())
}
