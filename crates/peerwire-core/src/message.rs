//! Message-level types shared by every peerwire endpoint role.
//!
//! A [`Payload`] is the unit a caller hands to `broadcast`/`send_to` and the
//! unit a session delivers to its peer.  The endpoint never looks inside the
//! bytes; interpretation belongs entirely to the applications on both ends.
//! [`SendOptions`] travels alongside a payload and is forwarded verbatim to
//! the session that performs the delivery; the endpoint itself enforces no
//! timeout and adds no retry.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identity of one accepted raw connection.
///
/// Distinct from the session *name*: the name is assigned by the peer during
/// its setup handshake, while the connection id is minted by the endpoint at
/// accept time and never changes for the life of the connection.
pub type ConnectionId = Uuid;

/// What one settled send yields: `Some(reply)` for a receptive send, `None`
/// for fire-and-forget.
pub type Delivery = Option<Payload>;

/// Errors produced while encoding a value into a [`Payload`] or back.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The value could not be serialized.
    #[error("failed to encode value into payload: {0}")]
    Encode(#[source] bincode::Error),
    /// The payload bytes did not deserialize into the requested type.
    #[error("failed to decode payload: {0}")]
    Decode(#[source] bincode::Error),
}

/// An opaque application payload.
///
/// Wraps the raw bytes so the rest of the framework cannot accidentally
/// treat them as anything but a unit to move.  The [`Payload::encode`] /
/// [`Payload::decode`] helpers are a convenience for applications that speak
/// bincode-encoded Rust types; any byte content is equally valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Wraps raw bytes as a payload.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serializes `value` with bincode and wraps the result.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Encode`] if serialization fails.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, PayloadError> {
        bincode::serialize(value)
            .map(Self)
            .map_err(PayloadError::Encode)
    }

    /// Deserializes the payload bytes into `T` with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Decode`] if the bytes do not form a valid `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, PayloadError> {
        bincode::deserialize(&self.0).map_err(PayloadError::Decode)
    }

    /// Returns the payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the payload, returning the underlying bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Per-send options, forwarded verbatim from the caller to the session.
///
/// `receptive` asks the session to wait for the peer's reply and surface it
/// as the [`Delivery`]; `timeout` bounds that wait.  A `timeout` on a
/// non-receptive send has no effect, since the send settles as soon as the
/// bytes are handed to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Whether the send settles with the peer's reply payload.
    pub receptive: bool,
    /// Upper bound on the reply wait; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    /// Options for a reply-awaiting send with no timeout.
    pub fn receptive() -> Self {
        Self {
            receptive: true,
            timeout: None,
        }
    }

    /// Returns a copy with the reply wait bounded by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Failure of a single delegated send, reported by the session that owns the
/// connection.  The server endpoint passes these through unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// A receptive send saw no reply within the configured bound.
    #[error("send timed out after {0:?} waiting for a reply")]
    Timeout(Duration),
    /// The session's connection is closed (or closed mid-send).
    #[error("session is disconnected")]
    Closed,
    /// The underlying transport reported a write or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
