//! Session handling — one task per accepted connection.

pub mod handshake;
pub mod listener;
pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use parley_core::config::SessionConfig;
use parley_services::{Connection, SessionRegistry, SharedRegistry};

pub use handshake::{HandshakeError, Pairing};
pub use relay::{Relay, RelayExit};

/// Drive a connection through handshake and relay.
///
/// Returns `None` when the handshake failed and the connection was dropped
/// without ever being registered.
pub async fn serve_connection(
    registry: SharedRegistry,
    connection: Arc<Connection>,
    config: SessionConfig,
) -> Option<RelayExit> {
    let pairing = match handshake::pair(&registry, connection.clone(), &config).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(
                conn = connection.id(),
                addr = %connection.remote_addr(),
                error = %e,
                "handshake failed, closing connection"
            );
            connection.close().await;
            return None;
        }
    };

    let relay = Relay::new(registry, pairing.local, pairing.to, config.peer_wait());
    Some(relay.run().await)
}

/// Periodically log the registry contents.
///
/// Runs until the task is aborted or the runtime stops.
pub async fn snapshot_loop(registry: SharedRegistry, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        log_snapshot(&registry);
    }
}

/// Log one line per registered session. Returns how many were logged.
pub fn log_snapshot(registry: &SessionRegistry) -> usize {
    let entries = registry.snapshot();
    tracing::info!(count = entries.len(), "session registry snapshot");
    for entry in &entries {
        tracing::info!(
            identity = %entry.identity,
            addr = %entry.connection.remote_addr(),
            conn = entry.connection_id(),
            connected_secs = entry.established_at.elapsed().as_secs(),
            "  session"
        );
    }
    entries.len()
}
