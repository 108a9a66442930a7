//! End-to-end tests for the server endpoint over real sockets.
//!
//! # Purpose
//!
//! These tests run the whole stack the way a deployment does: a
//! `ServerNode` with the bundled `FramedSessionFactory` accepting real TCP
//! (and Unix) connections from hand-driven peers speaking the frame codec.
//! They verify:
//!
//! - A peer's `Hello` handshake registers it under its chosen name, and a
//!   name collision is refused with an unaccepting `HelloAck`.
//! - `broadcast` and `send_to` reach live peers, including the receptive
//!   round trip where the peer's `Reply` settles the send.
//! - Inbound receptive messages surface to the endpoint's owner with a
//!   working reply slot.
//! - Shutdown is observable from the peer side as an orderly `Bye`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

use peerwire_core::protocol::codec::{decode_frame, encode_frame, CodecError};
use peerwire_core::protocol::frames::{Frame, HelloFrame, MessageFrame, ReplyFrame};
use peerwire_core::{Payload, SendError, SendOptions};
use peerwire_server::{
    BoundAddr, BroadcastOptions, DispatchError, FramedSessionFactory, ListenSpec, PeerMessage,
    ServerEvent, ServerNode,
};

// ── Hand-driven peer ──────────────────────────────────────────────────────────

/// A minimal peer speaking the frame codec over any stream transport.
struct TestPeer<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestPeer<S> {
    /// Performs the name handshake and asserts it was accepted.
    async fn handshake(stream: S, name: &str) -> Self {
        let mut peer = Self {
            stream,
            buf: Vec::new(),
        };
        peer.write(&Frame::Hello(HelloFrame {
            name: name.to_string(),
        }))
        .await;
        match peer.read().await {
            Frame::HelloAck(ack) if ack.accepted => peer,
            other => panic!("handshake for {name:?} not accepted: {other:?}"),
        }
    }

    async fn write(&mut self, frame: &Frame) {
        let bytes = encode_frame(frame).expect("encode");
        self.stream.write_all(&bytes).await.expect("write frame");
        self.stream.flush().await.expect("flush");
    }

    /// Reads the next complete frame, pulling more bytes as needed.
    async fn read(&mut self) -> Frame {
        loop {
            match decode_frame(&self.buf) {
                Ok((frame, consumed)) => {
                    self.buf.drain(..consumed);
                    return frame;
                }
                Err(CodecError::InsufficientData { .. }) => {
                    let mut chunk = [0u8; 4096];
                    let n = timeout(Duration::from_secs(2), self.stream.read(&mut chunk))
                        .await
                        .expect("frame within 2s")
                        .expect("read");
                    assert_ne!(n, 0, "stream closed while a frame was expected");
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => panic!("peer received a malformed frame: {e}"),
            }
        }
    }

    /// Asserts the server side closes the stream (after at most one `Bye`).
    async fn expect_close(&mut self) {
        loop {
            match decode_frame(&self.buf) {
                Ok((Frame::Bye, consumed)) => {
                    self.buf.drain(..consumed);
                    continue;
                }
                Ok((other, _)) => panic!("expected close, got {other:?}"),
                Err(CodecError::InsufficientData { .. }) => {
                    let mut chunk = [0u8; 4096];
                    let n = timeout(Duration::from_secs(2), self.stream.read(&mut chunk))
                        .await
                        .expect("close within 2s")
                        .expect("read");
                    if n == 0 {
                        return;
                    }
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => panic!("peer received a malformed frame: {e}"),
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Endpoint {
    node: Arc<ServerNode>,
    events: mpsc::Receiver<ServerEvent>,
    inbound: mpsc::Receiver<PeerMessage>,
    addr: std::net::SocketAddr,
}

/// Starts a full endpoint on an ephemeral TCP port.
async fn start_endpoint(name: &str) -> Endpoint {
    let (factory, inbound) = FramedSessionFactory::new();
    let (node, events) = ServerNode::new(name, Arc::new(factory));
    let bound = assert_ok!(node.connect(ListenSpec::tcp(0)).await);
    let BoundAddr::Tcp(addr) = bound else {
        panic!("expected a TCP address");
    };
    Endpoint {
        node,
        events,
        inbound,
        addr,
    }
}

async fn tcp_peer(addr: std::net::SocketAddr, name: &str) -> TestPeer<TcpStream> {
    let stream = TcpStream::connect(addr).await.expect("peer connect");
    TestPeer::handshake(stream, name).await
}

/// Polls until `cond` holds, for situations where registration races the
/// assertion (the handshake runs on the session's own task).
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

fn payload(bytes: &[u8]) -> Payload {
    Payload::new(bytes.to_vec())
}

// ── Handshake and registration ────────────────────────────────────────────────

/// Tests that a peer's `Hello` registers a session under the peer-assigned
/// name, resolvable through the node's lookup surface.
#[tokio::test]
async fn test_hello_handshake_registers_the_session() {
    // Arrange
    let endpoint = start_endpoint("endpoint-a").await;

    // Act
    let _alice = tcp_peer(endpoint.addr, "alice").await;

    // Assert
    wait_until(|| endpoint.node.has("alice")).await;
    let session = endpoint.node.get("alice").expect("alice resolves");
    assert!(endpoint.node.has(session.connection_id()));

    endpoint.node.disconnect().await;
}

/// Tests that a second peer claiming a taken name is refused: the `HelloAck`
/// is unaccepting, the connection closes, and the first session survives.
#[tokio::test]
async fn test_duplicate_name_is_refused() {
    // Arrange
    let endpoint = start_endpoint("endpoint-a").await;
    let _alice = tcp_peer(endpoint.addr, "alice").await;
    wait_until(|| endpoint.node.has("alice")).await;
    let original = endpoint.node.get("alice").expect("alice resolves");

    // Act – a usurper presents the same name
    let stream = TcpStream::connect(endpoint.addr).await.expect("connect");
    let mut usurper = TestPeer {
        stream,
        buf: Vec::new(),
    };
    usurper
        .write(&Frame::Hello(HelloFrame {
            name: "alice".to_string(),
        }))
        .await;

    // Assert
    match usurper.read().await {
        Frame::HelloAck(ack) => {
            assert!(!ack.accepted);
            assert!(ack.reason.is_some(), "the refusal must carry a reason");
        }
        other => panic!("expected a refusing HelloAck, got {other:?}"),
    }
    usurper.expect_close().await;

    let survivor = endpoint.node.get("alice").expect("alice still registered");
    assert_eq!(survivor.connection_id(), original.connection_id());

    endpoint.node.disconnect().await;
}

/// Tests that a peer saying `Bye` deregisters its session.
#[tokio::test]
async fn test_peer_bye_deregisters_the_session() {
    // Arrange
    let endpoint = start_endpoint("endpoint-a").await;
    let mut alice = tcp_peer(endpoint.addr, "alice").await;
    wait_until(|| endpoint.node.has("alice")).await;

    // Act
    alice.write(&Frame::Bye).await;

    // Assert
    let node = Arc::clone(&endpoint.node);
    wait_until(move || !node.has("alice")).await;

    endpoint.node.disconnect().await;
}

// ── Outbound dispatch ─────────────────────────────────────────────────────────

/// Tests that `broadcast` delivers the payload to every connected peer as a
/// non-receptive `Message` frame.
#[tokio::test]
async fn test_broadcast_reaches_every_connected_peer() {
    // Arrange
    let endpoint = start_endpoint("endpoint-a").await;
    let mut alice = tcp_peer(endpoint.addr, "alice").await;
    let mut bob = tcp_peer(endpoint.addr, "bob").await;
    wait_until(|| endpoint.node.has("alice") && endpoint.node.has("bob")).await;

    // Act
    let deliveries = endpoint
        .node
        .broadcast(payload(b"room update"), BroadcastOptions::default())
        .await
        .expect("broadcast");

    // Assert
    assert_eq!(deliveries, vec![None, None]);
    for peer in [&mut alice, &mut bob] {
        match peer.read().await {
            Frame::Message(msg) => {
                assert_eq!(msg.payload, payload(b"room update"));
                assert!(!msg.receptive);
            }
            other => panic!("expected the broadcast Message, got {other:?}"),
        }
    }

    endpoint.node.disconnect().await;
}

/// Tests the receptive round trip: the peer's `Reply` settles `send_to` with
/// the reply payload.
#[tokio::test]
async fn test_receptive_send_to_settles_with_the_reply() {
    // Arrange
    let endpoint = start_endpoint("endpoint-a").await;
    let mut alice = tcp_peer(endpoint.addr, "alice").await;
    wait_until(|| endpoint.node.has("alice")).await;

    // Act – issue the send, then answer it from the peer side
    let node = Arc::clone(&endpoint.node);
    let send = tokio::spawn(async move {
        node.send_to(
            "alice",
            payload(b"who are you"),
            SendOptions::receptive().with_timeout(Duration::from_secs(2)),
        )
        .await
    });

    let seq = match alice.read().await {
        Frame::Message(msg) => {
            assert!(msg.receptive);
            assert_eq!(msg.payload, payload(b"who are you"));
            msg.seq
        }
        other => panic!("expected the receptive Message, got {other:?}"),
    };
    alice
        .write(&Frame::Reply(ReplyFrame {
            seq,
            payload: payload(b"alice, obviously"),
        }))
        .await;

    // Assert
    let delivery = send.await.expect("join").expect("send_to");
    assert_eq!(delivery, Some(payload(b"alice, obviously")));

    endpoint.node.disconnect().await;
}

/// Tests that a silent peer makes a receptive send fail with the configured
/// timeout.
#[tokio::test]
async fn test_receptive_send_times_out_on_a_silent_peer() {
    // Arrange
    let endpoint = start_endpoint("endpoint-a").await;
    let mut alice = tcp_peer(endpoint.addr, "alice").await;
    wait_until(|| endpoint.node.has("alice")).await;

    // Act – the peer reads the message but never answers
    let bound = Duration::from_millis(100);
    let result = endpoint
        .node
        .send_to(
            "alice",
            payload(b"anyone home"),
            SendOptions::receptive().with_timeout(bound),
        )
        .await;

    // Assert
    match result {
        Err(DispatchError::Send(SendError::Timeout(d))) => assert_eq!(d, bound),
        other => panic!("expected the timeout, got {other:?}"),
    }
    // The frame did reach the peer; only the reply is missing.
    assert!(matches!(alice.read().await, Frame::Message(_)));

    endpoint.node.disconnect().await;
}

// ── Inbound messages ──────────────────────────────────────────────────────────

/// Tests that an inbound receptive message surfaces to the owner with a
/// working reply slot, and the peer receives the correlated `Reply`.
#[tokio::test]
async fn test_inbound_receptive_message_reaches_owner_and_reply_returns() {
    // Arrange
    let mut endpoint = start_endpoint("endpoint-a").await;
    let mut alice = tcp_peer(endpoint.addr, "alice").await;
    wait_until(|| endpoint.node.has("alice")).await;

    // Act – the peer asks a question
    alice
        .write(&Frame::Message(MessageFrame {
            seq: 7,
            receptive: true,
            payload: payload(b"what time is it"),
        }))
        .await;

    let message = timeout(Duration::from_secs(2), endpoint.inbound.recv())
        .await
        .expect("inbound message within 2s")
        .expect("inbound channel open");
    assert_eq!(message.from, "alice");
    assert_eq!(message.payload, payload(b"what time is it"));
    let reply = message.reply.expect("receptive message carries a reply slot");
    reply.send(payload(b"half past")).expect("reply slot open");

    // Assert – the peer sees the correlated reply
    match alice.read().await {
        Frame::Reply(r) => {
            assert_eq!(r.seq, 7);
            assert_eq!(r.payload, payload(b"half past"));
        }
        other => panic!("expected the Reply, got {other:?}"),
    }

    endpoint.node.disconnect().await;
}

// ── Shutdown seen from the peer side ──────────────────────────────────────────

/// Tests that `disconnect` is observable by live peers as an orderly close,
/// with the `Destroyed` lifecycle event emitted and the registry drained.
#[tokio::test]
async fn test_disconnect_closes_live_peer_connections() {
    // Arrange
    let mut endpoint = start_endpoint("endpoint-a").await;
    let mut alice = tcp_peer(endpoint.addr, "alice").await;
    let mut bob = tcp_peer(endpoint.addr, "bob").await;
    wait_until(|| endpoint.node.has("alice") && endpoint.node.has("bob")).await;
    assert!(matches!(
        timeout(Duration::from_secs(1), endpoint.events.recv())
            .await
            .expect("event")
            .expect("open"),
        ServerEvent::Ready { .. }
    ));

    // Act
    assert!(endpoint.node.disconnect().await);

    // Assert
    assert!(matches!(
        timeout(Duration::from_secs(1), endpoint.events.recv())
            .await
            .expect("event")
            .expect("open"),
        ServerEvent::Destroyed { .. }
    ));
    assert!(endpoint.node.registry().is_empty());
    alice.expect_close().await;
    bob.expect_close().await;
}

// ── Unix transport ────────────────────────────────────────────────────────────

/// Tests the same handshake/dispatch path over a Unix domain socket.
#[cfg(unix)]
#[tokio::test]
async fn test_unix_transport_end_to_end() {
    use tokio::net::UnixStream;

    // Arrange
    let dir = std::env::temp_dir().join(format!("peerwire_e2e_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("mkdir");
    let path = dir.join("endpoint.sock");

    let (factory, _inbound) = FramedSessionFactory::new();
    let (node, _events) = ServerNode::new("endpoint-uds", Arc::new(factory));
    assert_ok!(node.connect(ListenSpec::unix(&path)).await);

    // Act
    let stream = UnixStream::connect(&path).await.expect("uds connect");
    let mut alice = TestPeer::handshake(stream, "alice").await;
    wait_until(|| node.has("alice")).await;

    let deliveries = node
        .broadcast(payload(b"over the socket file"), BroadcastOptions::default())
        .await
        .expect("broadcast");

    // Assert
    assert_eq!(deliveries.len(), 1);
    assert!(matches!(alice.read().await, Frame::Message(_)));

    node.disconnect().await;
    std::fs::remove_dir_all(&dir).ok();
}
