//! Binary codec for encoding and decoding peerwire frames.
//!
//! Wire format:
//! ```text
//! [version:1][kind:1][reserved:2][body_len:4][body:N]
//! ```
//! Total header size: 8 bytes.  Multi-byte integers are big-endian.  The body
//! is the bincode serialization of the per-kind frame struct; `Bye` has an
//! empty body.

use thiserror::Error;

use crate::protocol::frames::{
    Frame, FrameKind, HelloAckFrame, HelloFrame, MessageFrame, ReplyFrame, HEADER_SIZE,
    MAX_BODY_LEN, PROTOCOL_VERSION,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The byte slice is shorter than the frame it starts.  Callers reading
    /// from a stream should treat this as "wait for more bytes".
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The version byte in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The kind byte in the header is not a recognized value.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    /// The declared body length exceeds [`MAX_BODY_LEN`].
    #[error("frame body of {0} bytes exceeds the {MAX_BODY_LEN}-byte limit")]
    Oversized(usize),

    /// The body could not be serialized or deserialized.
    #[error("malformed frame body: {0}")]
    Malformed(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Frame`] into a byte vector including the 8-byte header.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if body serialization fails and
/// [`CodecError::Oversized`] if the body would exceed [`MAX_BODY_LEN`].
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let body = encode_body(frame)?;
    if body.len() > MAX_BODY_LEN {
        return Err(CodecError::Oversized(body.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());

    // Header: version (1) + kind (1) + reserved (2) + body_len (4) = 8 bytes
    buf.push(PROTOCOL_VERSION);
    buf.push(frame.kind() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());

    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decodes one [`Frame`] from the beginning of `bytes`.
///
/// Returns the decoded frame and the total number of bytes consumed (header +
/// body), so a caller reading from a stream can advance its cursor.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are malformed, or
/// [`CodecError::InsufficientData`] if the slice ends before the frame does.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let kind = FrameKind::try_from(bytes[1]).map_err(|_| CodecError::UnknownFrameKind(bytes[1]))?;

    let body_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if body_len > MAX_BODY_LEN {
        return Err(CodecError::Oversized(body_len));
    }

    let total = HEADER_SIZE + body_len;
    if bytes.len() < total {
        return Err(CodecError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let body = &bytes[HEADER_SIZE..total];
    let frame = decode_body(kind, body)?;
    Ok((frame, total))
}

/// Reads the body length a header declares, without decoding the body.
///
/// Useful for stream readers that want to size their next read.  Returns
/// the *total* frame length (header included).
///
/// # Errors
///
/// Returns [`CodecError`] for a short, foreign-version, or oversized header.
pub fn frame_len(header: &[u8]) -> Result<usize, CodecError> {
    if header.len() < HEADER_SIZE {
        return Err(CodecError::InsufficientData {
            needed: HEADER_SIZE,
            available: header.len(),
        });
    }
    if header[0] != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(header[0]));
    }
    let body_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if body_len > MAX_BODY_LEN {
        return Err(CodecError::Oversized(body_len));
    }
    Ok(HEADER_SIZE + body_len)
}

// ── Body serialization ────────────────────────────────────────────────────────

fn encode_body(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let result = match frame {
        Frame::Hello(body) => bincode::serialize(body),
        Frame::HelloAck(body) => bincode::serialize(body),
        Frame::Message(body) => bincode::serialize(body),
        Frame::Reply(body) => bincode::serialize(body),
        Frame::Bye => return Ok(Vec::new()),
    };
    result.map_err(|e| CodecError::Malformed(e.to_string()))
}

fn decode_body(kind: FrameKind, body: &[u8]) -> Result<Frame, CodecError> {
    let malformed = |e: bincode::Error| CodecError::Malformed(e.to_string());
    match kind {
        FrameKind::Hello => bincode::deserialize::<HelloFrame>(body)
            .map(Frame::Hello)
            .map_err(malformed),
        FrameKind::HelloAck => bincode::deserialize::<HelloAckFrame>(body)
            .map(Frame::HelloAck)
            .map_err(malformed),
        FrameKind::Message => bincode::deserialize::<MessageFrame>(body)
            .map(Frame::Message)
            .map_err(malformed),
        FrameKind::Reply => bincode::deserialize::<ReplyFrame>(body)
            .map(Frame::Reply)
            .map_err(malformed),
        FrameKind::Bye => {
            if body.is_empty() {
                Ok(Frame::Bye)
            } else {
                Err(CodecError::Malformed(format!(
                    "Bye frame carries {} unexpected body bytes",
                    body.len()
                )))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
