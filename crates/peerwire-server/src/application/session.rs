//! The client-session contract consumed by the registry and dispatch engine.
//!
//! A session is the server-side handle for one accepted connection.  The
//! session owns everything connection-shaped: the wire format, reply
//! correlation, and timeout enforcement.  The server endpoint only resolves
//! sessions by name and delegates sends to them, which is why this trait is
//! all the application layer ever sees.  The bundled implementation lives in
//! `infrastructure::session::framed`; tests substitute recording doubles.

use async_trait::async_trait;
use peerwire_core::{ConnectionId, Delivery, Payload, SendError, SendOptions};

/// Server-side handle for one accepted connection, addressed by the name the
/// peer chose during its setup handshake.
#[async_trait]
pub trait ClientSession: Send + Sync {
    /// Identity of the underlying raw connection, minted at accept time.
    fn connection_id(&self) -> ConnectionId;

    /// Delivers `payload` to the peer.
    ///
    /// With `options.receptive` the send settles with the peer's reply (or a
    /// [`SendError::Timeout`] once `options.timeout` elapses); otherwise it
    /// settles as soon as the payload is handed to the transport.
    async fn send(&self, payload: Payload, options: SendOptions) -> Result<Delivery, SendError>;

    /// Tears the connection down.  Idempotent; pending receptive sends fail
    /// with [`SendError::Closed`].
    async fn disconnect(&self) -> Result<(), SendError>;
}
