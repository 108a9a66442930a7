//! The session registry: the server's name → session map.
//!
//! Sessions insert themselves once their setup handshake has produced a name
//! and remove themselves when their connection ends; the shutdown cascade
//! drains whatever is left.  Lookup accepts three identifier shapes via
//! [`SessionRef`]: a name, an already-resolved handle (returned unchanged),
//! or a raw connection id (resolved by scanning the sessions' underlying
//! connections).
//!
//! # Why a Vec
//!
//! Broadcast fan-out is specified in registration order, and a server
//! endpoint tracks peers in the dozens, not the thousands.  A `Vec` keeps
//! insertion order for free and makes every lookup a short linear scan;
//! a map plus a separate order index would buy nothing here.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use peerwire_core::ConnectionId;

use crate::application::session::ClientSession;

/// Error type for registry mutations.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    /// A live session already holds the requested name.
    #[error("a session named {0:?} is already registered")]
    NameTaken(String),
}

/// An identifier that can be resolved to a registered session.
///
/// The explicit tag replaces inspect-the-argument dispatch: every accepted
/// identifier shape is a variant, and anything else does not typecheck.
#[derive(Clone)]
pub enum SessionRef {
    /// The peer-assigned session name.
    Name(String),
    /// An already-resolved session handle; lookup returns it unchanged.
    Handle(Arc<dyn ClientSession>),
    /// The identity of the session's underlying raw connection.
    Connection(ConnectionId),
}

impl fmt::Debug for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            SessionRef::Handle(session) => f
                .debug_tuple("Handle")
                .field(&session.connection_id())
                .finish(),
            SessionRef::Connection(id) => f.debug_tuple("Connection").field(id).finish(),
        }
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRef::Name(name) => write!(f, "session name {name:?}"),
            SessionRef::Handle(session) => {
                write!(f, "session handle (connection {})", session.connection_id())
            }
            SessionRef::Connection(id) => write!(f, "connection {id}"),
        }
    }
}

impl From<&str> for SessionRef {
    fn from(name: &str) -> Self {
        SessionRef::Name(name.to_string())
    }
}

impl From<String> for SessionRef {
    fn from(name: String) -> Self {
        SessionRef::Name(name)
    }
}

impl From<ConnectionId> for SessionRef {
    fn from(id: ConnectionId) -> Self {
        SessionRef::Connection(id)
    }
}

impl From<Arc<dyn ClientSession>> for SessionRef {
    fn from(session: Arc<dyn ClientSession>) -> Self {
        SessionRef::Handle(session)
    }
}

struct Entry {
    name: String,
    session: Arc<dyn ClientSession>,
}

/// Insertion-ordered map of session name → session handle.
///
/// All operations take and release the lock inside one call; nothing is held
/// across an await, so readers always observe a consistent snapshot.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<Vec<Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means some reader panicked mid-scan; the entries
    // themselves are always left valid, so recover rather than propagate.
    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `session` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NameTaken`] when another live session already
    /// holds the name; the caller decides whether to refuse its handshake.
    pub fn insert(
        &self,
        name: &str,
        session: Arc<dyn ClientSession>,
    ) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        if entries.iter().any(|e| e.name == name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        entries.push(Entry {
            name: name.to_string(),
            session,
        });
        Ok(())
    }

    /// Removes and returns the session registered under `name`.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn ClientSession>> {
        let mut entries = self.lock();
        let index = entries.iter().position(|e| e.name == name)?;
        Some(entries.remove(index).session)
    }

    /// Resolves `target` to a session, or `None` when nothing matches.
    ///
    /// An already-resolved [`SessionRef::Handle`] is returned unchanged, so
    /// `get` is idempotent over its own results.
    pub fn get(&self, target: &SessionRef) -> Option<Arc<dyn ClientSession>> {
        match target {
            SessionRef::Handle(session) => Some(Arc::clone(session)),
            SessionRef::Name(name) => self
                .lock()
                .iter()
                .find(|e| &e.name == name)
                .map(|e| Arc::clone(&e.session)),
            SessionRef::Connection(id) => self
                .lock()
                .iter()
                .find(|e| e.session.connection_id() == *id)
                .map(|e| Arc::clone(&e.session)),
        }
    }

    /// Boolean form of [`Registry::get`].
    pub fn has(&self, target: &SessionRef) -> bool {
        self.get(target).is_some()
    }

    /// Returns every registered `(name, session)` pair in registration order.
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn ClientSession>)> {
        self.lock()
            .iter()
            .map(|e| (e.name.clone(), Arc::clone(&e.session)))
            .collect()
    }

    /// Returns the registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.name.clone()).collect()
    }

    /// Empties the registry, returning everything it held in registration
    /// order.  Used by the shutdown cascade.
    pub fn drain(&self) -> Vec<(String, Arc<dyn ClientSession>)> {
        std::mem::take(&mut *self.lock())
            .into_iter()
            .map(|e| (e.name, e.session))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
