//! Pairing handshake.
//!
//! Reads the `{name, to}` record, registers the caller, and reports whether
//! the requested peer is online. Never waits for the peer to show up.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::time::timeout;

use parley_core::config::SessionConfig;
use parley_core::wire::{decode_handshake, Handshake, Presence, WireError};
use parley_services::{Connection, SessionEntry, SessionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("connection closed before handshake completed")]
    Disconnected,
    #[error("handshake not received within deadline")]
    Timeout,
    #[error("handshake exceeds {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("handshake i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a successful handshake.
#[derive(Debug)]
pub struct Pairing {
    /// The caller's registry entry.
    pub local: Arc<SessionEntry>,
    /// Identity the caller wants to reach.
    pub to: String,
    pub presence: Presence,
}

/// Read the handshake record from the front of the stream.
///
/// Only the bytes belonging to the record are consumed. Anything the client
/// pipelined after it stays buffered for the relay.
pub async fn read_handshake(conn: &Connection, max_bytes: usize) -> Result<Handshake, HandshakeError> {
    let mut reader = conn.lock_reader().await;
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(HandshakeError::Disconnected);
        }
        let already_consumed = pending.len();
        let fresh = available.len();
        pending.extend_from_slice(available);

        if let Some((handshake, used)) = decode_handshake(&pending)? {
            reader.consume(used.saturating_sub(already_consumed));
            return Ok(handshake);
        }

        reader.consume(fresh);
        if pending.len() >= max_bytes {
            return Err(HandshakeError::TooLarge(max_bytes));
        }
    }
}

/// Run the full pairing handshake on a fresh connection.
///
/// On error nothing is left in the registry. Closing the connection is up
/// to the caller.
pub async fn pair(
    registry: &SessionRegistry,
    connection: Arc<Connection>,
    config: &SessionConfig,
) -> Result<Pairing, HandshakeError> {
    let Handshake { name, to } = timeout(
        config.handshake_timeout(),
        read_handshake(&connection, config.max_handshake_bytes),
    )
    .await
    .map_err(|_| HandshakeError::Timeout)??;

    let local = Arc::new(SessionEntry::new(name.clone(), connection.clone()));

    if let Some(evicted) = registry.register(local.clone()) {
        tracing::info!(
            identity = %name,
            evicted_conn = evicted.connection_id(),
            evicted_addr = %evicted.connection.remote_addr(),
            "identity re-registered, closing previous connection"
        );
        evicted.connection.close().await;
    }

    let presence = match registry.lookup(&to) {
        Some(peer) => {
            if peer.connection_id() != connection.id() {
                notify_arrival(peer, config.handshake_timeout());
            }
            Presence::Online
        }
        None => Presence::Offline,
    };

    if let Err(e) = connection.send(presence.as_bytes()).await {
        registry.remove_connection(&name, connection.id());
        return Err(e.into());
    }

    tracing::info!(
        identity = %name,
        peer = %to,
        %presence,
        addr = %connection.remote_addr(),
        "handshake complete"
    );

    Ok(Pairing { local, to, presence })
}

/// Tell `peer` that someone arrived, without holding up the caller.
///
/// Best effort: the peer may be on its way out or not reading at all.
fn notify_arrival(peer: Arc<SessionEntry>, limit: Duration) {
    tokio::spawn(async move {
        match timeout(limit, peer.connection.send(Presence::Online.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(peer = %peer.identity, error = %e, "failed to notify peer of arrival");
            }
            Err(_) => {
                tracing::warn!(peer = %peer.identity, "peer not reading, arrival notice dropped");
            }
        }
    });
}
