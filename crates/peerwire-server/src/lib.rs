//! # peerwire-server
//!
//! The server-side half of a peerwire messaging endpoint: it listens for
//! inbound stream connections, tracks each accepted connection as a named
//! client session, and offers broadcast and targeted-send primitives with
//! optional reply-awaiting and timeout semantics.
//!
//! The crate splits along the seam between pure logic and I/O:
//! `application` holds the registry and dispatch engine over the
//! [`application::session::ClientSession`] contract, while `infrastructure`
//! holds listener binding, the lifecycle state machine, the bundled framed
//! session handler, and configuration.

pub mod application;
pub mod infrastructure;

// Re-export the public endpoint surface at the crate root.
pub use application::dispatch::{BroadcastOptions, DispatchError, Dispatcher};
pub use application::registry::{Registry, RegistryError, SessionRef};
pub use application::session::ClientSession;
pub use infrastructure::network::listen::{BoundAddr, Connection, Listener, ListenSpec};
pub use infrastructure::network::server_node::{
    ConnectError, ServerEvent, ServerNode, ServerState, SessionFactory,
};
pub use infrastructure::session::framed::{FramedSessionFactory, PeerMessage};
