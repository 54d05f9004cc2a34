//! Price-level order book built from snapshots and incremental updates.
//!
//! Both sides are ordered maps keyed by the exact binary32 price — no
//! epsilon, no fixed-point conversion. Exchange tick increments are exactly
//! representable in the supported range, so equal prices compare equal by
//! bit pattern. Crossed books are not rejected here; that policy belongs to
//! the consumer.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::warn;

use crate::protocol::BookLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Side::Bid),
            1 => Some(Side::Ask),
            _ => None,
        }
    }
}

/// Map key giving f32 a total order.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Price(f32);

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<Price, u64>,
    asks: BTreeMap<Price, u64>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty both sides.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Replace the book with snapshot state. Zero-quantity levels are
    /// silently dropped: snapshots must not contain holes.
    pub fn load_snapshot(&mut self, bids: &[BookLevel], asks: &[BookLevel]) {
        self.clear();

        for level in bids {
            if level.quantity > 0 {
                self.bids.insert(Price(level.price), level.quantity);
            }
        }
        for level in asks {
            if level.quantity > 0 {
                self.asks.insert(Price(level.price), level.quantity);
            }
        }
    }

    /// Apply one incremental update: positive quantity inserts or
    /// overwrites the level, zero deletes it, negative is a protocol error
    /// that is logged and dropped.
    pub fn apply_update(&mut self, side: Side, price: f32, quantity: i64) {
        let book_side = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };

        if quantity == 0 {
            book_side.remove(&Price(price));
        } else if quantity > 0 {
            book_side.insert(Price(price), quantity as u64);
        } else {
            warn!(?side, price, quantity, "dropping update with negative quantity");
        }
    }

    /// Highest bid, or `None` when the bid side is empty.
    pub fn best_bid(&self) -> Option<(f32, u64)> {
        self.bids
            .iter()
            .next_back()
            .map(|(&Price(p), &q)| (p, q))
    }

    /// Lowest ask, or `None` when the ask side is empty.
    pub fn best_ask(&self) -> Option<(f32, u64)> {
        self.asks.iter().next().map(|(&Price(p), &q)| (p, q))
    }

    /// Up to `n` bid levels, best first.
    pub fn top_bids(&self, n: usize) -> Vec<BookLevel> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|(&Price(price), &quantity)| BookLevel { price, quantity })
            .collect()
    }

    /// Up to `n` ask levels, best first.
    pub fn top_asks(&self, n: usize) -> Vec<BookLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(&Price(price), &quantity)| BookLevel { price, quantity })
            .collect()
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Best ask minus best bid. `None` when either side is empty or the
    /// book is crossed.
    pub fn spread(&self) -> Option<f32> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) if bid < ask => Some(ask - bid),
            _ => None,
        }
    }
}
