//! Decode throughput and latency benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tickfeed::handler::{BinaryDecoder, FrameDecoder};
use tickfeed::protocol::{
    decode_header, decode_tick_payload, encode_heartbeat, encode_snapshot_response,
    encode_tick, BookLevel, HEADER_SIZE,
};
use tickfeed::reassembly::RecvBuffer;

fn tick_stream(count: usize) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(count * 33);
    for seq in 0..count as u64 {
        buffer.extend_from_slice(&encode_tick(
            seq,
            seq * 1000,
            b"AAPL",
            150.25 + (seq % 100) as f32 * 0.01,
            (seq % 500) as i32 + 1,
        ));
    }
    buffer
}

fn bench_decode_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_throughput");

    for msg_count in [1_000usize, 10_000, 100_000] {
        let buffer = black_box(tick_stream(msg_count));

        group.bench_with_input(
            BenchmarkId::from_parameter(msg_count),
            &msg_count,
            |b, _| {
                b.iter(|| {
                    let mut count = 0u64;
                    let mut offset = 0;
                    while offset + HEADER_SIZE <= buffer.len() {
                        let header = decode_header(&buffer[offset..]).unwrap();
                        let total = header.total_size();
                        let payload = &buffer[offset + HEADER_SIZE..offset + total];
                        black_box(decode_tick_payload(payload).unwrap());
                        offset += total;
                        count += 1;
                    }
                    count
                });
            },
        );
    }
    group.finish();
}

fn bench_decode_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_latency");

    let tick = encode_tick(42, 1_700_000_000, b"AAPL", 150.25, 100);
    group.bench_function("header", |b| {
        b.iter(|| decode_header(black_box(&tick)))
    });
    group.bench_function("tick_payload", |b| {
        b.iter(|| decode_tick_payload(black_box(&tick[HEADER_SIZE..])))
    });

    let heartbeat = encode_heartbeat(42, 1_700_000_000);
    group.bench_function("heartbeat_frame", |b| {
        b.iter(|| decode_header(black_box(&heartbeat)))
    });

    group.finish();
}

fn bench_reassembly_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly_drain");
    let stream = tick_stream(10_000);

    group.bench_function("10k_ticks_through_ring", |b| {
        b.iter(|| {
            let mut decoder = BinaryDecoder::new();
            let mut buf = RecvBuffer::new();
            let mut ticks = 0u64;

            let mut offset = 0;
            while offset < stream.len() {
                let region = buf.writable_region();
                let n = region.len().min(stream.len() - offset).min(16 * 1024);
                region[..n].copy_from_slice(&stream[offset..offset + n]);
                buf.commit_write(n);
                offset += n;

                decoder.drain(&mut buf, 0, |_| ticks += 1).unwrap();
            }
            ticks
        });
    });
    group.finish();
}

fn bench_snapshot_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_decode");

    let bids: Vec<BookLevel> = (0..100)
        .map(|i| BookLevel {
            price: 100.0 - i as f32 * 0.25,
            quantity: 1000 + i,
        })
        .collect();
    let asks: Vec<BookLevel> = (0..100)
        .map(|i| BookLevel {
            price: 100.25 + i as f32 * 0.25,
            quantity: 1000 + i,
        })
        .collect();
    let msg = encode_snapshot_response(1, b"AAPL", &bids, &asks);

    group.bench_function("200_levels", |b| {
        b.iter(|| {
            tickfeed::protocol::decode_snapshot_response_payload(black_box(&msg[HEADER_SIZE..]))
                .unwrap()
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_decode_throughput,
    bench_decode_latency,
    bench_reassembly_drain,
    bench_snapshot_decode
);
criterion_main!(benches);
