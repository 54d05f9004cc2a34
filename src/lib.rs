//! tickfeed — low-latency market data feed handler.
//!
//! Client-side ingress pipeline for real-time ticks and order book
//! updates:
//! - Framed binary protocol (length-prefixed, typed, sequence-numbered)
//!   and a newline-delimited text protocol
//! - Zero-allocation reassembly of partial reads via a fixed byte ring
//! - Lock-free SPSC/SPMC queues between the I/O and processing threads
//! - Sequence gap detection on TCP, gap recovery via retransmits on UDP
//! - Snapshot-based order book recovery with heartbeat-driven reconnection
//! - Per-stage latency statistics with percentile reporting

pub mod book;
pub mod clock;
pub mod connection;
pub mod gap;
pub mod handler;
pub mod protocol;
pub mod queue;
pub mod reassembly;
pub mod sequence;
pub mod snapshot;
pub mod stats;
pub mod text;
pub mod udp;

pub use book::{OrderBook, Side};
pub use connection::{ConnState, ConnectionManager};
pub use gap::{GapEvent, GapTracker};
pub use handler::{
    BinaryDecoder, BookFeedHandler, FeedConfig, FeedHandler, FeedStats, FrameDecoder, Protocol,
    TextDecoder, Tick, TimedTick,
};
pub use protocol::{BookLevel, MessageHeader, MessageType, WireError};
pub use reassembly::RecvBuffer;
pub use sequence::{SeqStatus, SequenceTracker};
pub use snapshot::{SnapshotClient, SnapshotStats};
pub use stats::{LatencyBreakdown, LatencyStats, LatencySummary};
pub use text::{TextParseError, TextTick};
pub use udp::{UdpConfig, UdpFeedHandler, UdpFeedStats};
