//! Snapshot-recovery client.
//!
//! Drives the full connection lifecycle against a single symbol's book:
//! request a snapshot after connecting, replay it, then apply incremental
//! updates. Incremental updates that race ahead of the snapshot are
//! dropped — the snapshot that follows supersedes them. A heartbeat
//! timeout or a closed connection triggers reconnection with exponential
//! backoff; every reconnect invalidates the book, resets the sequence
//! tracker, and re-enters the snapshot phase.
//!
//! Single-threaded by construction: the connection manager, reassembly
//! buffer, tracker, and book are all owned by the thread that calls `run`.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::book::{OrderBook, Side};
use crate::connection::ConnectionManager;
use crate::handler::FeedConfig;
use crate::protocol::{self, MessageType, WireError, HEADER_SIZE, MAX_PAYLOAD_SIZE, SYMBOL_LEN};
use crate::reassembly::RecvBuffer;
use crate::sequence::{SeqStatus, SequenceTracker};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub ticks_received: u64,
    pub heartbeats_received: u64,
    pub snapshots_received: u64,
    pub incremental_updates: u64,
    pub updates_ignored: u64,
    pub reconnections: u64,
    pub gaps_detected: u64,
}

pub struct SnapshotClient {
    conn: ConnectionManager,
    tracker: SequenceTracker,
    buf: RecvBuffer,
    book: OrderBook,
    stats: SnapshotStats,
    symbol: [u8; SYMBOL_LEN],
    client_sequence: u64,
    stop: Arc<AtomicBool>,
}

impl SnapshotClient {
    pub fn new(config: &FeedConfig, symbol: &str) -> Self {
        SnapshotClient {
            conn: ConnectionManager::with_timeouts(
                config.host.clone(),
                config.port,
                config.heartbeat_timeout(),
                config.max_backoff(),
            ),
            tracker: SequenceTracker::new(),
            buf: RecvBuffer::new(),
            book: OrderBook::new(),
            stats: SnapshotStats::default(),
            symbol: protocol::pad_symbol(symbol),
            client_sequence: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag another thread can set to end `run`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Initial connection; enters the snapshot-request phase.
    pub fn connect(&mut self) -> io::Result<()> {
        self.conn.connect()?;
        self.conn.transition_to_snapshot_request();
        Ok(())
    }

    /// Main loop until the stop flag is set. Reconnects indefinitely.
    pub fn run(&mut self) {
        while !self.stop.load(Ordering::Acquire) {
            if self.conn.is_heartbeat_timeout() {
                warn!(
                    silent_s = self.conn.seconds_since_last_message(),
                    "heartbeat timeout"
                );
                self.reconnect_and_resync();
                continue;
            }

            if self.conn.needs_snapshot_request() {
                if let Err(e) = self.send_snapshot_request() {
                    warn!(error = %e, "snapshot request failed");
                }
            }

            match self.poll() {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                    info!("connection lost");
                    self.reconnect_and_resync();
                }
            }
        }
    }

    /// One read-and-process pass. `Ok(false)` means the connection is gone
    /// and the caller should reconnect; a `WireError` means the stream is
    /// poisoned and must be treated the same way.
    pub fn poll(&mut self) -> Result<bool, WireError> {
        let Some(stream) = self.conn.stream() else {
            return Ok(false);
        };

        let region = self.buf.writable_region();
        if region.is_empty() {
            warn!("reassembly buffer full");
            return Ok(false);
        }

        let mut stream_ref = stream;
        match stream_ref.read(region) {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.buf.commit_write(n);
                self.process_messages()?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(1));
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(true),
            Err(e) => {
                warn!(error = %e, "recv failed");
                Ok(false)
            }
        }
    }

    fn process_messages(&mut self) -> Result<(), WireError> {
        let mut frame = [0u8; HEADER_SIZE + MAX_PAYLOAD_SIZE];

        loop {
            if self.buf.available() < HEADER_SIZE {
                return Ok(());
            }

            let mut header_bytes = [0u8; HEADER_SIZE];
            if !self.buf.peek_bytes(&mut header_bytes) {
                return Ok(());
            }
            let header = protocol::decode_header(&header_bytes).map_err(|e| {
                warn!(error = %e, "framing error, invalidating connection");
                e
            })?;

            let total = header.total_size();
            if self.buf.available() < total {
                return Ok(());
            }
            if !self.buf.read_bytes(&mut frame[..total]) {
                return Ok(());
            }

            self.conn.update_last_message_time();

            // Snapshot responses sit outside the sequenced stream.
            if header.msg_type != MessageType::SnapshotResponse {
                if let SeqStatus::Gap(_) = self.tracker.process(header.sequence) {
                    self.stats.gaps_detected += 1;
                }
            }

            let payload = &frame[HEADER_SIZE..total];
            match header.msg_type {
                MessageType::Tick | MessageType::RetransmitResponse => {
                    let tick = protocol::decode_tick_payload(payload)?;
                    self.stats.ticks_received += 1;
                    debug!(
                        sequence = header.sequence,
                        price = tick.price,
                        volume = tick.volume,
                        "tick"
                    );
                }
                MessageType::Heartbeat => {
                    let hb = protocol::decode_heartbeat_payload(payload)?;
                    self.stats.heartbeats_received += 1;
                    debug!(
                        sequence = header.sequence,
                        timestamp = hb.timestamp,
                        state = self.conn.state().name(),
                        "heartbeat"
                    );
                }
                MessageType::SnapshotResponse => self.apply_snapshot(payload)?,
                MessageType::OrderBookUpdate => self.apply_incremental(payload)?,
                MessageType::SnapshotRequest | MessageType::RetransmitRequest => {
                    // Server-bound frames; nothing for a client to do.
                    debug!(msg_type = ?header.msg_type, "ignoring server-bound frame");
                }
            }
        }
    }

    fn apply_snapshot(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let snap = protocol::decode_snapshot_response_payload(payload)?;
        self.stats.snapshots_received += 1;

        info!(
            bids = snap.bids.len(),
            asks = snap.asks.len(),
            "snapshot received"
        );
        self.book.load_snapshot(&snap.bids, &snap.asks);

        // The snapshot arrives complete in one frame, so replay finishes
        // as soon as it is applied.
        self.conn.transition_to_snapshot_replay();
        self.conn.transition_to_incremental();
        Ok(())
    }

    fn apply_incremental(&mut self, payload: &[u8]) -> Result<(), WireError> {
        if !self.conn.is_incremental() {
            self.stats.updates_ignored += 1;
            debug!("ignoring incremental update before snapshot replay completed");
            return Ok(());
        }

        let update = protocol::decode_order_book_update_payload(payload)?;
        let side = Side::from_u8(update.side).ok_or(WireError::InvalidSide(update.side))?;
        self.book.apply_update(side, update.price, update.quantity);
        self.stats.incremental_updates += 1;
        Ok(())
    }

    fn send_snapshot_request(&mut self) -> io::Result<()> {
        let request = protocol::encode_snapshot_request(self.client_sequence, &self.symbol);
        self.client_sequence += 1;

        let Some(stream) = self.conn.stream() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no stream"));
        };
        let mut stream_ref = stream;
        stream_ref.write_all(&request)?;

        self.conn.mark_snapshot_requested();
        info!("snapshot request sent");
        Ok(())
    }

    fn reconnect_and_resync(&mut self) {
        if self.conn.reconnect().is_ok() {
            self.stats.reconnections += 1;
            self.tracker.reset();
            self.buf.clear();
            self.conn.transition_to_snapshot_request();
        }
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    pub fn sequence_tracker(&self) -> &SequenceTracker {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnState;
    use crate::protocol::BookLevel;
    use std::net::TcpListener;

    fn client_with_server() -> (SnapshotClient, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = FeedConfig {
            port,
            ..FeedConfig::default()
        };
        let mut client = SnapshotClient::new(&config, "AAPL");
        client.connect().unwrap();
        let (server_side, _) = listener.accept().unwrap();
        (client, server_side)
    }

    fn drive_until(client: &mut SnapshotClient, mut pred: impl FnMut(&SnapshotClient) -> bool) {
        for _ in 0..500 {
            if pred(client) {
                return;
            }
            client.poll().unwrap();
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_snapshot_then_incremental_flow() {
        let (mut client, mut server) = client_with_server();
        assert_eq!(client.connection().state(), ConnState::SnapshotRequest);

        let bids = vec![
            BookLevel { price: 100.50, quantity: 1000 },
            BookLevel { price: 100.25, quantity: 2000 },
        ];
        let asks = vec![BookLevel { price: 100.75, quantity: 800 }];
        server
            .write_all(&protocol::encode_snapshot_response(1, b"AAPL", &bids, &asks))
            .unwrap();

        drive_until(&mut client, |c| c.stats().snapshots_received == 1);
        assert_eq!(client.connection().state(), ConnState::Incremental);
        assert_eq!(client.book().best_bid(), Some((100.50, 1000)));

        // Delete the best bid level.
        server
            .write_all(&protocol::encode_order_book_update(2, b"AAPL", 0, 100.50, 0))
            .unwrap();
        drive_until(&mut client, |c| c.stats().incremental_updates == 1);

        assert_eq!(client.book().best_bid(), Some((100.25, 2000)));
        assert_eq!(client.book().bid_depth(), 1);
        assert_eq!(client.stats().incremental_updates, 1);
    }

    #[test]
    fn test_incremental_ignored_before_snapshot() {
        let (mut client, mut server) = client_with_server();

        server
            .write_all(&protocol::encode_order_book_update(1, b"AAPL", 0, 99.0, 10))
            .unwrap();
        drive_until(&mut client, |c| c.stats().updates_ignored == 1);

        assert!(client.book().is_empty());
        assert_eq!(client.stats().updates_ignored, 1);
        assert_eq!(client.stats().incremental_updates, 0);
    }

    #[test]
    fn test_gap_counted_on_sequenced_stream() {
        let (mut client, mut server) = client_with_server();

        server.write_all(&protocol::encode_tick(1, 1, b"AAPL", 1.0, 1)).unwrap();
        server.write_all(&protocol::encode_tick(2, 2, b"AAPL", 1.0, 1)).unwrap();
        server.write_all(&protocol::encode_tick(7, 3, b"AAPL", 1.0, 1)).unwrap();
        drive_until(&mut client, |c| c.stats().ticks_received == 3);

        assert_eq!(client.stats().ticks_received, 3);
        assert_eq!(client.stats().gaps_detected, 1);
        assert_eq!(client.sequence_tracker().last_sequence(), Some(7));
    }
}
