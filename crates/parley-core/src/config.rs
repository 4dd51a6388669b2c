//! Configuration system for Parley.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PARLEY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/parley/config.toml
//!   3. ~/.config/parley/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub network: NetworkConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the broker listens on.
    pub host: String,
    /// TCP port for client connections. 0 = OS-assigned.
    pub port: u16,
    /// Listen backlog handed to the kernel.
    pub backlog: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Max concurrently admitted connections. 0 = unlimited.
    pub max_sessions: usize,
    /// How long a relay waits for its peer to register. 0 = forever.
    pub peer_wait_secs: u64,
    /// Deadline for the first handshake record to arrive.
    pub handshake_timeout_secs: u64,
    /// Upper bound on the handshake record size.
    pub max_handshake_bytes: usize,
    /// Interval between registry snapshot log lines. 0 = disabled.
    pub snapshot_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            backlog: 1024,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 0,
            peer_wait_secs: 300,
            handshake_timeout_secs: 10,
            max_handshake_bytes: 8192,
            snapshot_interval_secs: 30,
        }
    }
}

impl NetworkConfig {
    /// `host:port` string suitable for socket address parsing.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl SessionConfig {
    /// Peer wait bound, `None` when waiting is unbounded.
    pub fn peer_wait(&self) -> Option<Duration> {
        (self.peer_wait_secs > 0).then(|| Duration::from_secs(self.peer_wait_secs))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("parley")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ParleyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ParleyConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PARLEY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ParleyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PARLEY_* overrides. `lookup` resolves a variable name to its value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PARLEY_NETWORK__HOST") {
            self.network.host = v;
        }
        if let Some(p) = lookup("PARLEY_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(n) = lookup("PARLEY_NETWORK__BACKLOG").and_then(|v| v.parse().ok()) {
            self.network.backlog = n;
        }
        if let Some(n) = lookup("PARLEY_SESSIONS__MAX_SESSIONS").and_then(|v| v.parse().ok()) {
            self.sessions.max_sessions = n;
        }
        if let Some(s) = lookup("PARLEY_SESSIONS__PEER_WAIT_SECS").and_then(|v| v.parse().ok()) {
            self.sessions.peer_wait_secs = s;
        }
        if let Some(s) = lookup("PARLEY_SESSIONS__HANDSHAKE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.sessions.handshake_timeout_secs = s;
        }
        if let Some(n) = lookup("PARLEY_SESSIONS__MAX_HANDSHAKE_BYTES").and_then(|v| v.parse().ok()) {
            self.sessions.max_handshake_bytes = n;
        }
        if let Some(s) = lookup("PARLEY_SESSIONS__SNAPSHOT_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.sessions.snapshot_interval_secs = s;
        }
    }
}
