//! Application layer for the server endpoint.
//!
//! # Sub-modules
//!
//! - **`session`** – The `ClientSession` contract the registry and dispatch
//!   engine consume.  Concrete sessions live in the infrastructure layer and
//!   in test doubles.
//!
//! - **`registry`** – The insertion-ordered name → session map and the
//!   [`registry::SessionRef`] lookup tags.
//!
//! - **`dispatch`** – Broadcast fan-out and targeted sends over the registry,
//!   with the all-or-first-failure join policy.

pub mod dispatch;
pub mod registry;
pub mod session;
