//! Order book update and queue hot-path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use tickfeed::protocol::BookLevel;
use tickfeed::queue::spsc;
use tickfeed::{OrderBook, Side};

fn populated_book(levels: usize) -> OrderBook {
    let bids: Vec<BookLevel> = (0..levels)
        .map(|i| BookLevel {
            price: 100.0 - i as f32 * 0.01,
            quantity: 100 + i as u64,
        })
        .collect();
    let asks: Vec<BookLevel> = (0..levels)
        .map(|i| BookLevel {
            price: 100.01 + i as f32 * 0.01,
            quantity: 100 + i as u64,
        })
        .collect();

    let mut book = OrderBook::new();
    book.load_snapshot(&bids, &asks);
    book
}

fn bench_apply_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("book_apply_update");

    for levels in [100usize, 1_000, 10_000] {
        let mut rng = rand::thread_rng();
        let updates: Vec<(Side, f32, i64)> = (0..10_000)
            .map(|_| {
                let side = if rng.gen_bool(0.5) { Side::Bid } else { Side::Ask };
                let price = 100.0 + rng.gen_range(-50i32..50) as f32 * 0.01;
                let qty = rng.gen_range(0i64..1000);
                (side, price, qty)
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(levels), &levels, |b, &n| {
            let mut book = populated_book(n);
            let mut i = 0;
            b.iter(|| {
                let (side, price, qty) = updates[i % updates.len()];
                book.apply_update(side, black_box(price), black_box(qty));
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_top_of_book(c: &mut Criterion) {
    let mut group = c.benchmark_group("book_queries");

    let book = populated_book(10_000);
    group.bench_function("best_bid", |b| b.iter(|| black_box(book.best_bid())));
    group.bench_function("top_10_bids", |b| b.iter(|| black_box(book.top_bids(10))));
    group.finish();
}

fn bench_snapshot_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("book_snapshot_load");

    let bids: Vec<BookLevel> = (0..1000)
        .map(|i| BookLevel {
            price: 100.0 - i as f32 * 0.01,
            quantity: 100,
        })
        .collect();
    let asks: Vec<BookLevel> = (0..1000)
        .map(|i| BookLevel {
            price: 100.01 + i as f32 * 0.01,
            quantity: 100,
        })
        .collect();

    group.bench_function("1000_levels_per_side", |b| {
        let mut book = OrderBook::new();
        b.iter(|| book.load_snapshot(black_box(&bids), black_box(&asks)));
    });
    group.finish();
}

fn bench_spsc_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");

    let (tx, rx) = spsc::channel::<u64>(1024);
    group.bench_function("push_pop_pair", |b| {
        b.iter(|| {
            tx.push(black_box(42)).unwrap();
            black_box(rx.pop().unwrap());
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_apply_update,
    bench_top_of_book,
    bench_snapshot_load,
    bench_spsc_push_pop
);
criterion_main!(benches);
