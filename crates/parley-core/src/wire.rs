//! Parley wire format.
//!
//! A connection opens with a single JSON handshake record naming the sender
//! and the peer it wants to reach. The broker answers with a bare presence
//! token (`online` / `offline`, no framing). Everything after that is
//! newline-delimited text forwarded byte for byte.

use serde::{Deserialize, Serialize};

/// Delimiter separating relayed messages.
pub const MESSAGE_DELIMITER: u8 = b'\n';

// ── Handshake ────────────────────────────────────────────────────────────────

/// First record sent on a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Sender identity.
    pub name: String,
    /// Identity of the peer the sender wants to talk to.
    pub to: String,
}

impl Handshake {
    pub fn new(name: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            to: to.into(),
        }
    }

    /// Encode for sending. Serializing two strings cannot fail.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Trim both identities and reject empty ones.
    pub fn normalized(self) -> Result<Self, WireError> {
        let name = self.name.trim();
        let to = self.to.trim();
        if name.is_empty() {
            return Err(WireError::EmptyIdentity("name"));
        }
        if to.is_empty() {
            return Err(WireError::EmptyIdentity("to"));
        }
        Ok(Self::new(name, to))
    }
}

/// Decode a handshake from the front of `buf`.
///
/// Returns `Ok(None)` while the record is still incomplete, otherwise the
/// normalized record and the number of bytes it occupied. Leading whitespace
/// is part of the consumed span; anything after the record is left alone.
pub fn decode_handshake(buf: &[u8]) -> Result<Option<(Handshake, usize)>, WireError> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Handshake>();
    match stream.next() {
        None => Ok(None),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(WireError::Malformed(e)),
        Some(Ok(handshake)) => Ok(Some((handshake.normalized()?, stream.byte_offset()))),
    }
}

// ── Presence ─────────────────────────────────────────────────────────────────

/// Whether the requested peer was registered at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}

impl Presence {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Online => b"online",
            Self::Offline => b"offline",
        }
    }

    /// Match a presence token at the start of `buf`.
    /// Returns the token and its length.
    pub fn parse_prefix(buf: &[u8]) -> Option<(Self, usize)> {
        [Self::Online, Self::Offline]
            .into_iter()
            .find(|p| buf.starts_with(p.as_bytes()))
            .map(|p| (p, p.as_bytes().len()))
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed handshake: {0}")]
    Malformed(serde_json::Error),
    #[error("handshake field `{0}` is empty")]
    EmptyIdentity(&'static str),
}
