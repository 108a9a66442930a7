//! # peerwire-core
//!
//! Shared library for the peerwire messaging framework: the opaque payload
//! type, per-send options and error taxonomy, connection identifiers, and the
//! binary frame codec spoken by the bundled per-connection session handler.
//!
//! peerwire endpoints come in two roles.  A *server* endpoint listens for
//! inbound stream connections and tracks each one as a named client session;
//! an *outbound* endpoint dials into a remote server.  Both roles exchange
//! the same frames and settle sends with the same [`SendError`] taxonomy, so
//! those pieces live here, in a crate with no dependency on sockets or on
//! either role's state machine.

pub mod message;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `peerwire_core::Payload` instead of `peerwire_core::message::Payload`.
pub use message::{ConnectionId, Delivery, Payload, PayloadError, SendError, SendOptions};
pub use protocol::codec::{decode_frame, encode_frame, CodecError};
pub use protocol::frames::Frame;
