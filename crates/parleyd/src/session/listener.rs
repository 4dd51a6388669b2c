//! Accept loop.
//!
//! Binds the client-facing TCP socket, admits connections up to the
//! configured session limit, and hands each one to its own task.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};

use parley_core::config::SessionConfig;
use parley_services::{Connection, SharedRegistry};

use super::serve_connection;

pub struct SessionListener {
    listener: TcpListener,
    registry: SharedRegistry,
    config: SessionConfig,
    admission: Option<Arc<Semaphore>>,
    shutdown: broadcast::Receiver<()>,
}

impl SessionListener {
    /// Bind `addr` (`host:port`, host may be a name).
    pub fn bind(
        addr: &str,
        backlog: u32,
        registry: SharedRegistry,
        config: SessionConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {addr}"))?
            .next()
            .with_context(|| format!("{addr} resolved to no addresses"))?;

        let socket = make_listener_socket(addr, backlog)
            .with_context(|| format!("failed to bind {addr}"))?;
        let listener =
            TcpListener::from_std(socket).context("failed to convert to tokio TcpListener")?;

        let admission = (config.max_sessions > 0).then(|| Arc::new(Semaphore::new(config.max_sessions)));

        Ok(Self {
            listener,
            registry,
            config,
            admission,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("listener has no local address")
    }

    /// Accept until shutdown. An accept error is fatal.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            max_sessions = self.config.max_sessions,
            "session listener starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("session listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted.context("accept failed")?;

                    let permit = match &self.admission {
                        Some(limit) => match limit.clone().try_acquire_owned() {
                            Ok(p) => Some(p),
                            Err(_) => {
                                tracing::warn!(%peer_addr, "session limit reached, rejecting connection");
                                continue;
                            }
                        },
                        None => None,
                    };

                    let id = self.registry.next_connection_id();
                    let connection = match Connection::from_tcp(id, stream) {
                        Ok(c) => Arc::new(c),
                        Err(e) => {
                            tracing::warn!(%peer_addr, error = %e, "failed to set up connection");
                            continue;
                        }
                    };
                    tracing::debug!(%peer_addr, conn = id, "connection accepted");

                    let registry = self.registry.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        serve_connection(registry, connection, config).await;
                    });
                }
            }
        }
    }
}

/// Create a non-blocking, address-reusable TCP listening socket.
fn make_listener_socket(addr: SocketAddr, backlog: u32) -> Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.bind(&addr.into()).context("bind()")?;
    socket
        .listen(backlog.min(i32::MAX as u32) as i32)
        .context("listen()")?;

    Ok(socket.into())
}
