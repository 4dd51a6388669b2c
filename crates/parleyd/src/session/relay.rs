//! Relay loop and teardown.
//!
//! Each connection runs one relay that reads lines from its peer's stream
//! and writes them to its own. The loop is keyed by the peer's identity, not
//! by a connection, so a peer that reconnects under the same name is picked
//! up again.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use parley_services::{SessionEntry, SharedRegistry};

/// Why a relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The peer's stream ended, failed, or was closed.
    PeerGone,
    /// This side hung up, was closed, or could not be written to.
    LocalClosed,
    /// The peer did not register within the configured wait.
    PeerWaitExpired,
}

enum Step {
    Exit(RelayExit),
    /// The peer's entry was replaced by a newer connection.
    Superseded,
}

pub struct Relay {
    registry: SharedRegistry,
    local: Arc<SessionEntry>,
    to: String,
    peer_wait: Option<Duration>,
}

impl Relay {
    pub fn new(
        registry: SharedRegistry,
        local: Arc<SessionEntry>,
        to: String,
        peer_wait: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            local,
            to,
            peer_wait,
        }
    }

    /// Forward until failure, then tear down.
    pub async fn run(self) -> RelayExit {
        let (exit, peer) = self.forward().await;
        self.teardown(exit, peer.as_deref()).await;
        exit
    }

    async fn forward(&self) -> (RelayExit, Option<Arc<SessionEntry>>) {
        loop {
            let peer = match self.await_peer().await {
                Ok(peer) => peer,
                Err(exit) => return (exit, None),
            };

            tracing::debug!(
                identity = %self.local.identity,
                peer = %self.to,
                peer_conn = peer.connection_id(),
                "relaying"
            );

            match self.relay_from(&peer).await {
                Step::Exit(exit) => return (exit, Some(peer)),
                Step::Superseded => {
                    tracing::debug!(
                        identity = %self.local.identity,
                        peer = %self.to,
                        "peer reconnected, reattaching"
                    );
                }
            }
        }
    }

    /// AWAITING_PEER: block until `to` is registered.
    async fn await_peer(&self) -> Result<Arc<SessionEntry>, RelayExit> {
        if let Some(peer) = self.registry.lookup(&self.to) {
            return Ok(peer);
        }
        tracing::debug!(identity = %self.local.identity, peer = %self.to, "waiting for peer");

        let local = &self.local.connection;
        let arrival = async {
            let wait = self.registry.wait_for(&self.to);
            match self.peer_wait {
                Some(limit) => timeout(limit, wait).await.ok(),
                None => Some(wait.await),
            }
        };
        // Nobody reads this connection until its peer arrives, so watch for
        // a hang-up here. Once the client has sent something a hang-up can
        // no longer be told apart from pending input; stop probing then.
        let hangup = async {
            match local.probe_hangup().await {
                Ok(false) => std::future::pending::<()>().await,
                Ok(true) | Err(_) => {}
            }
        };

        tokio::select! {
            peer = arrival => peer.ok_or(RelayExit::PeerWaitExpired),
            _ = local.closed() => Err(RelayExit::LocalClosed),
            _ = hangup => Err(RelayExit::LocalClosed),
        }
    }

    /// RELAYING: copy lines from the peer to this connection.
    async fn relay_from(&self, peer: &SessionEntry) -> Step {
        let local = &self.local.connection;
        let mut line = Vec::with_capacity(256);

        loop {
            line.clear();
            let read = tokio::select! {
                r = peer.connection.read_line(&mut line) => r,
                _ = local.closed() => return Step::Exit(RelayExit::LocalClosed),
            };

            match read {
                Ok(0) => return Step::Exit(RelayExit::PeerGone),
                Ok(_) => {}
                Err(e) => {
                    if self.superseded(peer) {
                        return Step::Superseded;
                    }
                    tracing::debug!(peer = %self.to, error = %e, "peer read failed");
                    return Step::Exit(RelayExit::PeerGone);
                }
            }

            if let Err(e) = local.send(&line).await {
                tracing::debug!(identity = %self.local.identity, error = %e, "local write failed");
                return Step::Exit(RelayExit::LocalClosed);
            }
        }
    }

    fn superseded(&self, peer: &SessionEntry) -> bool {
        self.registry
            .lookup(&self.to)
            .is_some_and(|current| current.connection_id() != peer.connection_id())
    }

    /// Close handles and correct the registry. Runs once per relay.
    async fn teardown(&self, exit: RelayExit, peer: Option<&SessionEntry>) {
        if let (RelayExit::PeerGone, Some(peer)) = (exit, peer) {
            peer.connection.close().await;
            self.registry
                .remove_connection(&peer.identity, peer.connection_id());
        }

        self.local.connection.close().await;
        self.registry
            .remove_connection(&self.local.identity, self.local.connection_id());

        tracing::info!(
            identity = %self.local.identity,
            peer = %self.to,
            cause = ?exit,
            "session closed"
        );
    }
}
