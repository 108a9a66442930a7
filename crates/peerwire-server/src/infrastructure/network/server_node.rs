//! The server lifecycle state machine.
//!
//! A [`ServerNode`] owns at most one listening socket at a time and moves
//! through four states:
//!
//! ```text
//! Stopped ──connect()──► Starting ──bound──► Listening
//!    ▲                      │                    │
//!    │            bind error / early close       │ disconnect() /
//!    │                      │                    │ socket-level close
//!    └──────────────────────┴──── Stopping ◄─────┘
//! ```
//!
//! Startup races three terminal outcomes (the bind resolving, the bind
//! failing, a `disconnect()` arriving first) in one `tokio::select!`;
//! whichever branch fires, dropping the others detaches them, so no stale
//! startup watcher survives.  Once listening, the accept loop runs as its
//! own task with persistent handling for new connections and socket errors,
//! and any teardown path funnels through the same cascade: stop the
//! listener, announce `Destroyed`, disconnect every registered session,
//! return to `Stopped`.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use peerwire_core::{Delivery, Payload, SendOptions};

use crate::application::dispatch::{BroadcastOptions, DispatchError, Dispatcher};
use crate::application::registry::{Registry, SessionRef};
use crate::application::session::ClientSession;
use crate::infrastructure::network::listen::{BoundAddr, Connection, Listener, ListenSpec};

/// Capacity of the lifecycle event channel handed to the orchestrator.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Builds sessions for accepted connections.
///
/// `launch` must hand the connection off to its own task and return
/// immediately; the accept loop never waits for a handshake.  The launched
/// session registers itself into the registry under its peer-assigned name
/// once its setup completes, and removes itself when the connection ends.
pub trait SessionFactory: Send + Sync {
    fn launch(&self, conn: Connection, registry: Arc<Registry>);
}

/// Where the server currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No listener exists.  The initial state, and the terminal state after
    /// every full teardown.
    Stopped,
    /// `connect()` is binding the listener.
    Starting,
    /// The listener is accepting connections.
    Listening,
    /// A teardown cascade is in flight.
    Stopping,
}

/// Lifecycle notifications delivered to the owning orchestrator.
///
/// Events carry the node's name rather than a handle to the node itself; the
/// orchestrator already holds the handle and drops it when `Destroyed`
/// arrives.
#[derive(Debug)]
pub enum ServerEvent {
    /// The listener is bound and accepting connections.
    Ready { node: String, addr: BoundAddr },
    /// The server finished a full teardown, explicit or close-driven.
    Destroyed { node: String },
    /// Non-fatal socket-level error while listening; state is unchanged.
    Error { node: String, error: io::Error },
}

/// Error type for `connect`.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// `connect` was called while a listener already exists (or is being
    /// set up or torn down).
    #[error("server is already running (state: {0:?})")]
    AlreadyRunning(ServerState),

    /// The listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    /// `disconnect()` arrived before the listener finished binding.
    #[error("server was closed during startup")]
    ClosedDuringStartup,
}

struct Inner {
    state: ServerState,
    local_addr: Option<BoundAddr>,
    /// Fires when a disconnect arrives while still `Starting`.
    cancel_startup: Option<oneshot::Sender<()>>,
    /// Stops the accept loop of a `Listening` server.
    stop_accept: Option<oneshot::Sender<()>>,
}

/// The server-side half of a peerwire endpoint: one listening socket, the
/// session registry, and the dispatch surface over it.
pub struct ServerNode {
    name: String,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    factory: Arc<dyn SessionFactory>,
    events: mpsc::Sender<ServerEvent>,
    inner: Mutex<Inner>,
}

impl ServerNode {
    /// Creates a stopped server and returns it together with the lifecycle
    /// event receiver for the owning orchestrator.
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn SessionFactory>,
    ) -> (Arc<Self>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(Registry::new());
        let node = Arc::new(Self {
            name: name.into(),
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            factory,
            events: tx,
            inner: Mutex::new(Inner {
                state: ServerState::Stopped,
                local_addr: None,
                cancel_startup: None,
                stop_accept: None,
            }),
        });
        (node, rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// This node's name, as known to the orchestrator.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    /// The bound address while `Listening`, `None` otherwise.
    pub fn local_addr(&self) -> Option<BoundAddr> {
        self.lock().local_addr.clone()
    }

    /// The session registry, shared with launched sessions.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    // ── Startup ───────────────────────────────────────────────────────────────

    /// Binds a listener per `spec` and starts accepting connections.
    ///
    /// Resolves with the bound address once the server is `Listening`.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::AlreadyRunning`], before anything else happens,
    ///   unless the server is `Stopped`.
    /// - [`ConnectError::Bind`] when the listener cannot be bound; the server
    ///   returns to `Stopped`.
    /// - [`ConnectError::ClosedDuringStartup`] when `disconnect()` wins the
    ///   startup race.
    pub async fn connect(self: &Arc<Self>, spec: ListenSpec) -> Result<BoundAddr, ConnectError> {
        let cancel_rx = self.begin_startup()?;

        // Single-shot race over the three startup outcomes.  Dropping the
        // losing branch detaches it; a cancelled bind never leaks a listener
        // because the future owning the socket is dropped with it.
        let bound = tokio::select! {
            result = spec.bind() => result,
            _ = cancel_rx => {
                // disconnect() owns the state transition on this path.
                return Err(ConnectError::ClosedDuringStartup);
            }
        };

        match bound {
            Ok(listener) => self.finish_startup(Box::new(listener)).await,
            Err(e) => {
                self.abort_startup();
                Err(ConnectError::Bind(e))
            }
        }
    }

    /// Starts accepting on an already-built listener.
    ///
    /// The generalised form of adopting a pre-bound native handle: anything
    /// implementing [`Listener`] can serve.
    ///
    /// # Errors
    ///
    /// Same contract as [`ServerNode::connect`], minus the bind failure.
    pub async fn connect_with(
        self: &Arc<Self>,
        listener: Box<dyn Listener>,
    ) -> Result<BoundAddr, ConnectError> {
        let _cancel_rx = self.begin_startup()?;
        self.finish_startup(listener).await
    }

    /// Transitions `Stopped → Starting`, returning the startup-cancel signal.
    fn begin_startup(&self) -> Result<oneshot::Receiver<()>, ConnectError> {
        let mut inner = self.lock();
        if inner.state != ServerState::Stopped {
            return Err(ConnectError::AlreadyRunning(inner.state));
        }
        inner.state = ServerState::Starting;
        let (tx, rx) = oneshot::channel();
        inner.cancel_startup = Some(tx);
        Ok(rx)
    }

    /// Rolls a failed startup back to `Stopped`.
    fn abort_startup(&self) {
        let mut inner = self.lock();
        if inner.state == ServerState::Starting {
            inner.state = ServerState::Stopped;
            inner.cancel_startup = None;
        }
    }

    /// Transitions `Starting → Listening` and spawns the accept loop.
    async fn finish_startup(
        self: &Arc<Self>,
        listener: Box<dyn Listener>,
    ) -> Result<BoundAddr, ConnectError> {
        let addr = listener.local_addr();
        let stop_rx = {
            let mut inner = self.lock();
            if inner.state != ServerState::Starting {
                // disconnect() slipped in between bind and here; dropping the
                // listener closes the socket.
                return Err(ConnectError::ClosedDuringStartup);
            }
            inner.state = ServerState::Listening;
            inner.local_addr = Some(addr.clone());
            inner.cancel_startup = None;
            let (tx, rx) = oneshot::channel();
            inner.stop_accept = Some(tx);
            rx
        };

        info!("server {:?} listening on {addr}", self.name);
        self.emit(ServerEvent::Ready {
            node: self.name.clone(),
            addr: addr.clone(),
        })
        .await;

        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.accept_loop(listener, stop_rx).await;
        });

        Ok(addr)
    }

    // ── Accept loop ───────────────────────────────────────────────────────────

    async fn accept_loop(
        self: Arc<Self>,
        mut listener: Box<dyn Listener>,
        mut stop: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("server {:?}: accept loop stopped", self.name);
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => {
                        debug!(
                            "server {:?}: accepted connection {} from {}",
                            self.name,
                            conn.id(),
                            conn.peer()
                        );
                        self.factory.launch(conn, Arc::clone(&self.registry));
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!("server {:?}: accept error (non-fatal): {e}", self.name);
                        self.emit(ServerEvent::Error {
                            node: self.name.clone(),
                            error: e,
                        })
                        .await;
                    }
                    Err(e) => {
                        // The listening socket is gone underneath us.  Tear
                        // down exactly as an external disconnect() would;
                        // returning drops the dead listener.
                        error!("server {:?}: listener closed: {e}", self.name);
                        drop(listener);
                        self.disconnect().await;
                        return;
                    }
                }
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Stops the server and cascades a disconnect through every registered
    /// session.
    ///
    /// Returns `true` iff a running (or starting) server was stopped; a
    /// `Stopped` server, or one already mid-teardown, is a no-op returning
    /// `false`.
    pub async fn disconnect(&self) -> bool {
        {
            let mut inner = self.lock();
            match inner.state {
                ServerState::Stopped | ServerState::Stopping => return false,
                ServerState::Starting => {
                    if let Some(cancel) = inner.cancel_startup.take() {
                        let _ = cancel.send(());
                    }
                }
                ServerState::Listening => {
                    if let Some(stop) = inner.stop_accept.take() {
                        let _ = stop.send(());
                    }
                }
            }
            inner.state = ServerState::Stopping;
            inner.local_addr = None;
        }

        info!("server {:?} stopping", self.name);
        self.emit(ServerEvent::Destroyed {
            node: self.name.clone(),
        })
        .await;

        // Cascade.  Every session is asked to disconnect; one failing
        // session never keeps the rest connected.
        for (name, session) in self.registry.drain() {
            if let Err(e) = session.disconnect().await {
                warn!("session {name:?}: disconnect failed: {e}");
            }
        }

        self.lock().state = ServerState::Stopped;
        info!("server {:?} stopped", self.name);
        true
    }

    async fn emit(&self, event: ServerEvent) {
        if self.events.send(event).await.is_err() {
            debug!("server {:?}: lifecycle event receiver dropped", self.name);
        }
    }

    // ── Dispatch surface ──────────────────────────────────────────────────────

    /// Resolves `target` to a registered session.  See [`Registry::get`].
    pub fn get(&self, target: impl Into<SessionRef>) -> Option<Arc<dyn ClientSession>> {
        self.registry.get(&target.into())
    }

    /// Boolean form of [`ServerNode::get`].
    pub fn has(&self, target: impl Into<SessionRef>) -> bool {
        self.registry.has(&target.into())
    }

    /// Broadcasts `payload` to the sessions selected by `options`.  See
    /// [`Dispatcher::broadcast`].
    pub async fn broadcast(
        &self,
        payload: Payload,
        options: BroadcastOptions,
    ) -> Result<Vec<Delivery>, DispatchError> {
        self.dispatcher.broadcast(payload, options).await
    }

    /// Sends `payload` to the session identified by `target`.  See
    /// [`Dispatcher::send_to`].
    pub async fn send_to(
        &self,
        target: impl Into<SessionRef>,
        payload: Payload,
        options: SendOptions,
    ) -> Result<Delivery, DispatchError> {
        self.dispatcher.send_to(target, payload, options).await
    }
}

/// Returns `true` for accept errors that do not indicate a dead listener.
///
/// Anything outside this set is treated as the socket closing underneath the
/// server, which drives the full shutdown cascade.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_accept_errors_are_recognised() {
        // Arrange / Act / Assert – a half-open connection dying in the accept
        // queue must not kill the server
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::WouldBlock,
            io::ErrorKind::Interrupted,
        ] {
            let e = io::Error::new(kind, "transient");
            assert!(is_transient_accept_error(&e), "{kind:?} must be transient");
        }
    }

    #[test]
    fn test_fatal_accept_errors_are_not_transient() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::NotFound,
        ] {
            let e = io::Error::new(kind, "fatal");
            assert!(
                !is_transient_accept_error(&e),
                "{kind:?} must drive the shutdown cascade"
            );
        }
    }
}
