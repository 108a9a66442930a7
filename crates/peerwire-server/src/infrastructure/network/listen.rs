//! Listen specifications, bound listeners, and accepted connections.
//!
//! [`ListenSpec`] is the single tagged configuration the server's `connect`
//! consumes in place of an overload set: a TCP host/port/backlog triple, a
//! Unix socket path, or a pre-bound native TCP handle.  Binding yields a
//! [`BoundListener`], and anything implementing the [`Listener`] trait can be
//! handed to `ServerNode::connect_with` directly (which is also how the
//! lifecycle tests script socket-level failures).

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
#[cfg(unix)]
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use tracing::debug;
use uuid::Uuid;

use peerwire_core::ConnectionId;

/// Listen backlog applied when a listen spec does not name one.
pub const DEFAULT_BACKLOG: u32 = 128;

/// Tagged listen configuration consumed by `ServerNode::connect`.
#[derive(Debug)]
pub enum ListenSpec {
    /// Bind a TCP listener on `host:port`.
    Tcp {
        host: IpAddr,
        port: u16,
        backlog: u32,
    },
    /// Bind a Unix domain socket at `path`.  A stale socket file left by a
    /// dead process is removed before binding.
    #[cfg(unix)]
    Unix { path: PathBuf },
    /// Adopt an already-bound native TCP listener.
    TcpHandle(std::net::TcpListener),
}

impl ListenSpec {
    /// TCP on loopback with the default backlog.
    pub fn tcp(port: u16) -> Self {
        ListenSpec::Tcp {
            host: Ipv4Addr::LOCALHOST.into(),
            port,
            backlog: DEFAULT_BACKLOG,
        }
    }

    /// TCP on an explicit host and backlog.
    pub fn tcp_on(host: IpAddr, port: u16, backlog: u32) -> Self {
        ListenSpec::Tcp {
            host,
            port,
            backlog,
        }
    }

    /// Unix domain socket at `path`.
    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ListenSpec::Unix { path: path.into() }
    }

    /// Binds this spec, producing a live listener.
    pub async fn bind(self) -> io::Result<BoundListener> {
        match self {
            ListenSpec::Tcp {
                host,
                port,
                backlog,
            } => {
                let addr = SocketAddr::new(host, port);
                // TcpSocket instead of TcpListener::bind so the configured
                // backlog actually reaches listen(2).
                let socket = match addr {
                    SocketAddr::V4(_) => TcpSocket::new_v4()?,
                    SocketAddr::V6(_) => TcpSocket::new_v6()?,
                };
                socket.bind(addr)?;
                let listener = socket.listen(backlog)?;
                Ok(BoundListener::Tcp(listener))
            }
            #[cfg(unix)]
            ListenSpec::Unix { path } => {
                remove_stale_socket(&path);
                let listener = UnixListener::bind(&path)?;
                Ok(BoundListener::Unix { listener, path })
            }
            ListenSpec::TcpHandle(listener) => {
                listener.set_nonblocking(true)?;
                Ok(BoundListener::Tcp(TcpListener::from_std(listener)?))
            }
        }
    }
}

/// Removes a socket file that no process is listening on.
#[cfg(unix)]
fn remove_stale_socket(path: &Path) {
    if path.exists() && std::os::unix::net::UnixStream::connect(path).is_err() {
        debug!("removing stale socket file {}", path.display());
        let _ = std::fs::remove_file(path);
    }
}

/// The address a listener ended up bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddr {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl fmt::Display for BoundAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            BoundAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// A listening socket the accept loop can drive.
///
/// The server consumes the trait rather than a concrete listener so tests can
/// script accept outcomes without opening real sockets.
#[async_trait]
pub trait Listener: Send {
    /// Waits for and returns the next inbound connection.
    async fn accept(&mut self) -> io::Result<Connection>;

    /// The address this listener is bound to.
    fn local_addr(&self) -> BoundAddr;
}

/// A live listening socket produced by [`ListenSpec::bind`].
pub enum BoundListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

#[async_trait]
impl Listener for BoundListener {
    async fn accept(&mut self) -> io::Result<Connection> {
        match self {
            BoundListener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok(Connection::tcp(stream, peer))
            }
            #[cfg(unix)]
            BoundListener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok(Connection::unix(stream, path))
            }
        }
    }

    fn local_addr(&self) -> BoundAddr {
        match self {
            BoundListener::Tcp(listener) => {
                // A bound TCP listener always knows its local address; fall
                // back to the unspecified address rather than panicking if
                // the socket is in a torn state.
                let addr = listener
                    .local_addr()
                    .unwrap_or_else(|_| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0));
                BoundAddr::Tcp(addr)
            }
            #[cfg(unix)]
            BoundListener::Unix { path, .. } => BoundAddr::Unix(path.clone()),
        }
    }
}

#[cfg(unix)]
impl Drop for BoundListener {
    fn drop(&mut self) {
        // Leave no socket file behind; the next bind would only have to
        // treat it as stale.
        if let BoundListener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// One accepted raw connection, not yet owned by a session.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    stream: ConnStream,
}

enum ConnStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Boxed read half of an accepted connection.
pub type ConnectionReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of an accepted connection.
pub type ConnectionWriter = Box<dyn AsyncWrite + Send + Unpin>;

impl Connection {
    fn tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.to_string(),
            stream: ConnStream::Tcp(stream),
        }
    }

    #[cfg(unix)]
    fn unix(stream: UnixStream, path: &Path) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: path.display().to_string(),
            stream: ConnStream::Unix(stream),
        }
    }

    /// Identity minted for this connection at accept time.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Display string for the remote end, for log messages.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Splits the connection into independently owned read and write halves.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        match self.stream {
            ConnStream::Tcp(stream) => {
                let (read, write) = stream.into_split();
                (Box::new(read), Box::new(write))
            }
            #[cfg(unix)]
            ConnStream::Unix(stream) => {
                let (read, write) = stream.into_split();
                (Box::new(read), Box::new(write))
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
