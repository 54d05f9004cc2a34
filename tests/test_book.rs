//! Order book correctness tests.

use tickfeed::protocol::BookLevel;
use tickfeed::{OrderBook, Side};

fn level(price: f32, quantity: u64) -> BookLevel {
    BookLevel { price, quantity }
}

#[test]
fn test_snapshot_then_incremental_scenario() {
    // Snapshot AAPL bids=[(100.50,1000),(100.25,2000)] asks=[(100.75,800)],
    // then a zero-quantity update deleting the best bid.
    let mut book = OrderBook::new();
    book.load_snapshot(
        &[level(100.50, 1000), level(100.25, 2000)],
        &[level(100.75, 800)],
    );

    assert_eq!(book.best_bid(), Some((100.50, 1000)));
    assert_eq!(book.best_ask(), Some((100.75, 800)));
    assert_eq!(book.bid_depth(), 2);

    book.apply_update(Side::Bid, 100.50, 0);
    assert_eq!(book.best_bid(), Some((100.25, 2000)));
    assert_eq!(book.bid_depth(), 1);
}

#[test]
fn test_no_zero_quantity_level_persists() {
    let mut book = OrderBook::new();
    for i in 0..100 {
        book.apply_update(Side::Bid, i as f32, 10);
    }
    for i in 0..100 {
        book.apply_update(Side::Bid, i as f32, 0);
    }
    assert_eq!(book.bid_depth(), 0);
    assert!(book.is_empty());
}

#[test]
fn test_best_bid_max_best_ask_min() {
    let mut book = OrderBook::new();
    let prices = [103.0f32, 99.5, 101.25, 100.0, 102.75];
    for &p in &prices {
        book.apply_update(Side::Bid, p, 1);
        book.apply_update(Side::Ask, p + 10.0, 1);
    }

    assert_eq!(book.best_bid().unwrap().0, 103.0);
    assert_eq!(book.best_ask().unwrap().0, 109.5);
}

#[test]
fn test_update_overwrites_quantity_at_level() {
    let mut book = OrderBook::new();
    book.apply_update(Side::Ask, 50.0, 100);
    book.apply_update(Side::Ask, 50.0, 250);
    assert_eq!(book.best_ask(), Some((50.0, 250)));
    assert_eq!(book.ask_depth(), 1);
}

#[test]
fn test_snapshot_replaces_previous_state() {
    let mut book = OrderBook::new();
    book.load_snapshot(&[level(1.0, 1), level(2.0, 2)], &[level(3.0, 3)]);
    book.load_snapshot(&[level(10.0, 10)], &[]);

    assert_eq!(book.best_bid(), Some((10.0, 10)));
    assert_eq!(book.bid_depth(), 1);
    assert_eq!(book.ask_depth(), 0);
}

#[test]
fn test_top_n_ordering_and_truncation() {
    let mut book = OrderBook::new();
    for i in 1..=20 {
        book.apply_update(Side::Bid, i as f32, i as i64);
        book.apply_update(Side::Ask, 100.0 + i as f32, i as i64);
    }

    let bids = book.top_bids(5);
    assert_eq!(bids.len(), 5);
    assert_eq!(bids[0].price, 20.0);
    assert_eq!(bids[4].price, 16.0);

    let asks = book.top_asks(5);
    assert_eq!(asks[0].price, 101.0);
    assert_eq!(asks[4].price, 105.0);

    assert_eq!(book.top_bids(50).len(), 20);
}

#[test]
fn test_prices_compared_as_binary32() {
    let mut book = OrderBook::new();
    // Distinct f64 values that collapse to the same binary32 land on the
    // same level.
    let a = 100.000001f64 as f32;
    let b = 100.0000011f64 as f32;
    assert_eq!(a.to_bits(), b.to_bits());

    book.apply_update(Side::Bid, a, 10);
    book.apply_update(Side::Bid, b, 20);
    assert_eq!(book.bid_depth(), 1);
    assert_eq!(book.best_bid(), Some((a, 20)));
}

#[test]
fn test_clear_and_crossed_book() {
    let mut book = OrderBook::new();
    book.apply_update(Side::Bid, 102.0, 1);
    book.apply_update(Side::Ask, 101.0, 1);

    // Crossed: permitted, surfaced as-is.
    assert!(book.best_bid().unwrap().0 > book.best_ask().unwrap().0);

    book.clear();
    assert!(book.is_empty());
    assert_eq!(book.best_bid(), None);
    assert_eq!(book.best_ask(), None);
}

#[test]
fn test_negative_quantity_update_is_dropped() {
    let mut book = OrderBook::new();
    book.apply_update(Side::Ask, 10.0, 5);
    book.apply_update(Side::Ask, 10.0, -1);
    book.apply_update(Side::Ask, 11.0, i64::MIN);

    assert_eq!(book.best_ask(), Some((10.0, 5)));
    assert_eq!(book.ask_depth(), 1);
}
