//! Criterion benchmarks for the peerwire frame codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package peerwire-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use peerwire_core::message::Payload;
use peerwire_core::protocol::codec::{decode_frame, encode_frame};
use peerwire_core::protocol::frames::{
    Frame, HelloAckFrame, HelloFrame, MessageFrame, ReplyFrame,
};

// ── Frame fixtures ────────────────────────────────────────────────────────────

fn make_hello() -> Frame {
    Frame::Hello(HelloFrame {
        name: "benchmark-peer".to_string(),
    })
}

fn make_hello_ack() -> Frame {
    Frame::HelloAck(HelloAckFrame {
        accepted: true,
        reason: None,
    })
}

fn make_message(payload_len: usize) -> Frame {
    Frame::Message(MessageFrame {
        seq: 42,
        receptive: true,
        payload: Payload::new(vec![0xA5; payload_len]),
    })
}

fn make_reply() -> Frame {
    Frame::Reply(ReplyFrame {
        seq: 42,
        payload: Payload::new(b"ok".to_vec()),
    })
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Benchmarks `encode_frame` for every frame kind.
fn bench_encode(c: &mut Criterion) {
    let frames: &[(&str, Frame)] = &[
        ("Hello", make_hello()),
        ("HelloAck", make_hello_ack()),
        ("Message(64B)", make_message(64)),
        ("Message(4KiB)", make_message(4096)),
        ("Reply", make_reply()),
        ("Bye", Frame::Bye),
    ];

    let mut group = c.benchmark_group("encode_frame");
    for (name, frame) in frames {
        group.bench_with_input(BenchmarkId::new("frame", name), frame, |b, frame| {
            b.iter(|| encode_frame(black_box(frame)).expect("encode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks `decode_frame` from pre-encoded bytes.
fn bench_decode(c: &mut Criterion) {
    let frames: &[(&str, Frame)] = &[
        ("Hello", make_hello()),
        ("Message(64B)", make_message(64)),
        ("Message(4KiB)", make_message(4096)),
        ("Reply", make_reply()),
        ("Bye", Frame::Bye),
    ];

    let mut group = c.benchmark_group("decode_frame");
    for (name, frame) in frames {
        let bytes = encode_frame(frame).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("frame", name), &bytes, |b, bytes| {
            b.iter(|| decode_frame(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks a full encode+decode round-trip for the hot message path.
fn bench_roundtrip_hot_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_decode_roundtrip");

    let msg = make_message(256);
    group.bench_function("Message(256B)", |b| {
        b.iter(|| {
            let bytes = encode_frame(black_box(&msg)).unwrap();
            decode_frame(black_box(&bytes)).unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_roundtrip_hot_path);
criterion_main!(benches);
