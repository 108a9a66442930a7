//! Infrastructure layer for the server endpoint.
//!
//! # Sub-modules
//!
//! - **`network`** – Listener binding and the server lifecycle state machine.
//!
//! - **`session`** – The bundled framed-session handler: the concrete
//!   `ClientSession`/`SessionFactory` pair speaking the peerwire frame codec.
//!
//! - **`storage`** – TOML configuration persistence.

pub mod network;
pub mod session;
pub mod storage;
