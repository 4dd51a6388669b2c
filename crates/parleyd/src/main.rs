//! parleyd — Parley relay broker.

use std::time::Duration;

use anyhow::{Context, Result};

use parley_core::config::ParleyConfig;
use parley_services::SessionRegistry;
use parleyd::session::snapshot_loop;
use parleyd::SessionListener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ParleyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ParleyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParleyConfig::default()
    });

    let listen_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.network.listen_addr());
    tracing::info!(%listen_addr, "parleyd starting");

    let registry = SessionRegistry::shared();

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

    let listener = SessionListener::bind(
        &listen_addr,
        config.network.backlog,
        registry.clone(),
        config.sessions.clone(),
        shutdown_tx.subscribe(),
    )
    .context("failed to start session listener")?;
    let listener_task = tokio::spawn(listener.run());

    if config.sessions.snapshot_interval_secs > 0 {
        let every = Duration::from_secs(config.sessions.snapshot_interval_secs);
        tokio::spawn(snapshot_loop(registry.clone(), every));
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task => {
            let result = r.context("session listener panicked")?;
            if let Err(e) = &result {
                tracing::error!(error = %e, "session listener exited");
            }
            result?;
        }
    }

    Ok(())
}
