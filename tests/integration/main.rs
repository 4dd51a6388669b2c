//! Parley integration test harness.
//!
//! Each test starts its own broker in-process on an ephemeral loopback port
//! and talks to it over real TCP connections, the same way `parley-ctl`
//! does. Tests share nothing but the process.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use parley_core::config::SessionConfig;
use parley_services::{SessionRegistry, SharedRegistry};
use parleyd::SessionListener;

mod failures;
mod presence;

/// Upper bound for any single expectation.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Broker {
    pub addr: SocketAddr,
    pub registry: SharedRegistry,
    shutdown: broadcast::Sender<()>,
}

impl Broker {
    pub async fn start() -> Result<Self> {
        Self::start_with(SessionConfig::default()).await
    }

    pub async fn start_with(config: SessionConfig) -> Result<Self> {
        let registry = SessionRegistry::shared();
        let (shutdown, _) = broadcast::channel(1);
        let listener = SessionListener::bind(
            "127.0.0.1:0",
            64,
            registry.clone(),
            config,
            shutdown.subscribe(),
        )?;
        let addr = listener.local_addr()?;
        tokio::spawn(listener.run());
        Ok(Self {
            addr,
            registry,
            shutdown,
        })
    }

    /// Open a raw connection without sending anything.
    pub async fn dial(&self) -> Result<Client> {
        let stream = TcpStream::connect(self.addr)
            .await
            .with_context(|| format!("failed to connect to broker at {}", self.addr))?;
        Ok(Client { stream })
    }

    /// Connect and send a `{name, to}` handshake.
    pub async fn connect(&self, name: &str, to: &str) -> Result<Client> {
        let mut client = self.dial().await?;
        let record = serde_json::to_vec(&serde_json::json!({ "name": name, "to": to }))?;
        client.send(&record).await?;
        Ok(client)
    }

    /// Poll until `cond` holds on the registry.
    pub async fn wait_for_registry<F>(&self, what: &str, cond: F) -> Result<()>
    where
        F: Fn(&SessionRegistry) -> bool,
    {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if cond(&self.registry) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bail!("registry never reached state: {what}")
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await.context("client write failed")
    }

    /// Read exactly `expected.len()` bytes and compare.
    pub async fn expect(&mut self, expected: &[u8]) -> Result<()> {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(STEP_TIMEOUT, self.stream.read_exact(&mut buf))
            .await
            .with_context(|| format!("timed out waiting for {:?}", String::from_utf8_lossy(expected)))?
            .context("client read failed")?;
        if buf != expected {
            bail!(
                "expected {:?}, got {:?}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(&buf)
            );
        }
        Ok(())
    }

    /// The broker closed this connection without sending anything further.
    pub async fn expect_closed(&mut self) -> Result<()> {
        let mut rest = Vec::new();
        // A reset is as good as an orderly close here.
        let _ = tokio::time::timeout(STEP_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .context("connection was not closed")?;
        if !rest.is_empty() {
            bail!("unexpected bytes before close: {:?}", String::from_utf8_lossy(&rest));
        }
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr().context("client has no local address")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_broker_binds_ephemeral_port() {
    let broker = Broker::start().await.unwrap();
    assert_ne!(broker.addr.port(), 0);
    assert!(broker.registry.is_empty());
}
