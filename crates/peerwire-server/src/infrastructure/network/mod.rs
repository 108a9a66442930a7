//! Network infrastructure for the server endpoint.
//!
//! # Sub-modules
//!
//! - **`listen`** – The tagged [`listen::ListenSpec`] configuration, the
//!   [`listen::Listener`] abstraction with its real TCP/Unix implementation,
//!   and the accepted-connection type.
//!
//! - **`server_node`** – The lifecycle state machine: the single-shot startup
//!   race, the persistent accept loop, the shutdown cascade, and the
//!   lifecycle events delivered to the owning orchestrator.

pub mod listen;
pub mod server_node;
