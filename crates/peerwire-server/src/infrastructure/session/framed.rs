//! The bundled per-connection protocol handler.
//!
//! [`FramedSession`] speaks the peerwire frame codec over one accepted
//! connection and owns everything the server endpoint delegates to sessions:
//! the name handshake, reply correlation for receptive sends, timeout
//! enforcement, and its own registration lifecycle.
//!
//! Per connection there is exactly one task, spawned by
//! [`FramedSessionFactory::launch`]:
//!
//! 1. **Setup** – the peer must open with `Hello { name }` inside the
//!    handshake window.  The session registers itself under that name and
//!    answers `HelloAck`; a taken name or malformed hello is refused and the
//!    connection closed.
//! 2. **Read loop** – `Reply` frames complete pending receptive sends;
//!    inbound `Message` frames are surfaced to the endpoint's owner as
//!    [`PeerMessage`]s; `Bye` or EOF ends the session.
//! 3. **Teardown** – deregister, fail every pending send with
//!    [`SendError::Closed`].
//!
//! Outbound writes go through a `tokio::sync::Mutex` over the write half, so
//! sends issued by the dispatch engine and replies written for the owner
//! interleave without tearing frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use peerwire_core::protocol::codec::{decode_frame, encode_frame, frame_len, CodecError};
use peerwire_core::protocol::frames::{
    Frame, HelloAckFrame, MessageFrame, ReplyFrame, HEADER_SIZE,
};
use peerwire_core::{ConnectionId, Delivery, Payload, SendError, SendOptions};

use crate::application::registry::Registry;
use crate::application::session::ClientSession;
use crate::infrastructure::network::listen::{Connection, ConnectionReader, ConnectionWriter};
use crate::infrastructure::network::server_node::SessionFactory;

/// How long a freshly accepted connection may take to present its `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the inbound message channel handed to the endpoint's owner.
const INBOUND_CHANNEL_CAPACITY: usize = 128;

/// An inbound application message surfaced to the endpoint's owner.
#[derive(Debug)]
pub struct PeerMessage {
    /// Session name of the sending peer.
    pub from: String,
    /// The payload.
    pub payload: Payload,
    /// Present when the peer sent receptively: push the response payload
    /// through it and the session writes the correlated reply frame.
    /// Dropping it leaves the peer to its own timeout.
    pub reply: Option<oneshot::Sender<Payload>>,
}

/// Concrete [`ClientSession`] over the peerwire frame codec.
pub struct FramedSession {
    name: String,
    conn_id: ConnectionId,
    writer: Mutex<ConnectionWriter>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Payload>>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl FramedSession {
    /// The peer-assigned session name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn pending_lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Payload>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_remove(&self, seq: u64) -> Option<oneshot::Sender<Payload>> {
        self.pending_lock().remove(&seq)
    }

    /// Drops every pending reply waiter, waking each with a closed error.
    fn fail_pending(&self) {
        self.pending_lock().clear();
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), SendError> {
        let bytes = encode_frame(frame).map_err(|e| SendError::Transport(e.to_string()))?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ClientSession for FramedSession {
    fn connection_id(&self) -> ConnectionId {
        self.conn_id
    }

    async fn send(&self, payload: Payload, options: SendOptions) -> Result<Delivery, SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        // Register the reply waiter before the frame hits the wire; a fast
        // peer could answer before this task runs again.
        let waiter = if options.receptive {
            let (tx, rx) = oneshot::channel();
            self.pending_lock().insert(seq, tx);
            Some(rx)
        } else {
            None
        };

        let frame = Frame::Message(MessageFrame {
            seq,
            receptive: options.receptive,
            payload,
        });
        if let Err(e) = self.write_frame(&frame).await {
            self.pending_remove(seq);
            return Err(e);
        }

        let Some(waiter) = waiter else {
            return Ok(None);
        };

        match options.timeout {
            Some(bound) => match timeout(bound, waiter).await {
                Ok(Ok(reply)) => Ok(Some(reply)),
                Ok(Err(_)) => Err(SendError::Closed),
                Err(_) => {
                    self.pending_remove(seq);
                    Err(SendError::Timeout(bound))
                }
            },
            None => waiter.await.map(Some).map_err(|_| SendError::Closed),
        }
    }

    async fn disconnect(&self) -> Result<(), SendError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.fail_pending();

        // Best-effort goodbye; the peer may already be gone.
        let mut writer = self.writer.lock().await;
        if let Ok(bytes) = encode_frame(&Frame::Bye) {
            let _ = writer.write_all(&bytes).await;
            let _ = writer.flush().await;
        }
        let _ = writer.shutdown().await;
        Ok(())
    }
}

/// [`SessionFactory`] producing [`FramedSession`]s.
pub struct FramedSessionFactory {
    inbound: mpsc::Sender<PeerMessage>,
}

impl FramedSessionFactory {
    /// Creates the factory together with the receiver on which the endpoint's
    /// owner consumes inbound peer messages.
    pub fn new() -> (Self, mpsc::Receiver<PeerMessage>) {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        (Self { inbound: tx }, rx)
    }
}

impl SessionFactory for FramedSessionFactory {
    fn launch(&self, conn: Connection, registry: Arc<Registry>) {
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            run_session(conn, registry, inbound).await;
        });
    }
}

/// Drives one connection from handshake to teardown.
async fn run_session(
    conn: Connection,
    registry: Arc<Registry>,
    inbound: mpsc::Sender<PeerMessage>,
) {
    let conn_id = conn.id();
    let peer = conn.peer().to_string();
    let (mut reader, writer) = conn.into_split();

    // ── Setup: the peer introduces itself before anything else flows ─────────
    let hello = match timeout(HANDSHAKE_TIMEOUT, read_frame(&mut reader)).await {
        Ok(Ok(Frame::Hello(hello))) => hello,
        Ok(Ok(other)) => {
            warn!(
                "connection {conn_id}: expected Hello, got {:?}",
                other.kind()
            );
            return;
        }
        Ok(Err(e)) => {
            debug!("connection {conn_id}: handshake failed: {e}");
            return;
        }
        Err(_) => {
            warn!("connection {conn_id}: no Hello within {HANDSHAKE_TIMEOUT:?}");
            return;
        }
    };

    let session = Arc::new(FramedSession {
        name: hello.name.clone(),
        conn_id,
        writer: Mutex::new(writer),
        pending: StdMutex::new(HashMap::new()),
        next_seq: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });

    let registered = registry.insert(&hello.name, Arc::clone(&session) as Arc<dyn ClientSession>);
    if let Err(e) = registered {
        warn!("connection {conn_id}: refusing session {:?}: {e}", hello.name);
        let _ = session
            .write_frame(&Frame::HelloAck(HelloAckFrame {
                accepted: false,
                reason: Some(e.to_string()),
            }))
            .await;
        let _ = session.disconnect().await;
        return;
    }

    let ack = Frame::HelloAck(HelloAckFrame {
        accepted: true,
        reason: None,
    });
    if session.write_frame(&ack).await.is_err() {
        registry.remove(&hello.name);
        return;
    }
    info!(
        "session {:?} registered (connection {conn_id} from {peer})",
        hello.name
    );

    // ── Read loop ─────────────────────────────────────────────────────────────
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(ReadError::Eof) => {
                debug!("session {:?}: peer hung up", hello.name);
                break;
            }
            Err(e) => {
                debug!("session {:?}: read failed: {e}", hello.name);
                break;
            }
        };

        match frame {
            Frame::Reply(reply) => match session.pending_remove(reply.seq) {
                Some(waiter) => {
                    let _ = waiter.send(reply.payload);
                }
                None => {
                    // Late reply after a timeout, or a peer inventing seqs.
                    debug!("session {:?}: unmatched reply seq {}", hello.name, reply.seq);
                }
            },
            Frame::Message(message) => {
                let reply = message
                    .receptive
                    .then(|| spawn_reply_writer(Arc::clone(&session), message.seq));
                let delivered = inbound
                    .send(PeerMessage {
                        from: hello.name.clone(),
                        payload: message.payload,
                        reply,
                    })
                    .await;
                if delivered.is_err() {
                    // The owner dropped its receiver; nobody is listening.
                    debug!("session {:?}: inbound receiver gone", hello.name);
                    break;
                }
            }
            Frame::Bye => {
                debug!("session {:?}: peer said goodbye", hello.name);
                break;
            }
            Frame::Hello(_) | Frame::HelloAck(_) => {
                warn!(
                    "session {:?}: unexpected handshake frame mid-stream",
                    hello.name
                );
                break;
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    registry.remove(&hello.name);
    session.closed.store(true, Ordering::Release);
    session.fail_pending();
    debug!("session {:?} closed", hello.name);
}

/// Hands the owner a reply slot for a receptive inbound message.  A small
/// task waits on it so the read loop stays free while the owner thinks.
fn spawn_reply_writer(session: Arc<FramedSession>, seq: u64) -> oneshot::Sender<Payload> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Ok(payload) = rx.await {
            let frame = Frame::Reply(ReplyFrame { seq, payload });
            if let Err(e) = session.write_frame(&frame).await {
                debug!(
                    "session {:?}: reply for seq {seq} not delivered: {e}",
                    session.name()
                );
            }
        }
    });
    tx
}

// ── Frame reading ─────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("connection closed")]
    Eof,
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Reads exactly one frame from `reader`.
async fn read_frame(reader: &mut ConnectionReader) -> Result<Frame, ReadError> {
    let mut header = [0u8; HEADER_SIZE];
    if let Err(e) = reader.read_exact(&mut header).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(ReadError::Eof);
        }
        return Err(ReadError::Io(e));
    }

    let total = frame_len(&header)?;
    let mut buf = vec![0u8; total];
    buf[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut buf[HEADER_SIZE..]).await?;

    let (frame, _) = decode_frame(&buf)?;
    Ok(frame)
}
