//! Frame types spoken between a peerwire server endpoint and its peers.
//!
//! The framework deliberately keeps this surface small: a name handshake, a
//! payload-carrying message with an optional reply, and an orderly goodbye.
//! Everything an application wants to say travels inside the opaque
//! [`Payload`] of a `Message`/`Reply` pair.

use serde::{Deserialize, Serialize};

use crate::message::Payload;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Upper bound on an encoded frame body, guarding decode-side allocations.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

// ── Frame kind codes ──────────────────────────────────────────────────────────

/// Frame kind byte carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    // Handshake (0x00–0x0F)
    Hello = 0x01,
    HelloAck = 0x02,
    // Application traffic (0x10–0x1F)
    Message = 0x10,
    Reply = 0x11,
    Bye = 0x1F,
}

impl TryFrom<u8> for FrameKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(FrameKind::Hello),
            0x02 => Ok(FrameKind::HelloAck),
            0x10 => Ok(FrameKind::Message),
            0x11 => Ok(FrameKind::Reply),
            0x1F => Ok(FrameKind::Bye),
            _ => Err(()),
        }
    }
}

// ── Per-frame body structs ────────────────────────────────────────────────────

/// HELLO (0x01): first frame a peer sends after connecting, announcing the
/// session name it wants to be addressed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloFrame {
    /// Peer-assigned session name; must be unique on the receiving server.
    pub name: String,
}

/// HELLO_ACK (0x02): server's verdict on a `Hello`.
///
/// On `accepted: false` the server closes the connection immediately after
/// writing this frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAckFrame {
    /// Whether the session was registered.
    pub accepted: bool,
    /// Human-readable rejection reason; `None` when accepted.
    pub reason: Option<String>,
}

/// MESSAGE (0x10): one application payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFrame {
    /// Sender-local correlation number; echoed back by a `Reply`.
    pub seq: u64,
    /// Whether the sender expects a correlated `Reply`.
    pub receptive: bool,
    /// The application payload.
    pub payload: Payload,
}

/// REPLY (0x11): response to a receptive `Message`, correlated by `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// The `seq` of the `Message` this responds to.
    pub seq: u64,
    /// The response payload.
    pub payload: Payload,
}

// ── Top-level frame enum ──────────────────────────────────────────────────────

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Hello(HelloFrame),
    HelloAck(HelloAckFrame),
    Message(MessageFrame),
    Reply(ReplyFrame),
    /// Orderly close; carries no body.
    Bye,
}

impl Frame {
    /// Returns the kind byte for this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Hello(_) => FrameKind::Hello,
            Frame::HelloAck(_) => FrameKind::HelloAck,
            Frame::Message(_) => FrameKind::Message,
            Frame::Reply(_) => FrameKind::Reply,
            Frame::Bye => FrameKind::Bye,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
