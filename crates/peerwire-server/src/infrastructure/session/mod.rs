//! Session infrastructure: the bundled per-connection protocol handler.

pub mod framed;
