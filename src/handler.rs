//! Pipeline orchestrator.
//!
//! Wires a TCP transport, the reassembly buffer, a codec, an SPSC queue of
//! timed ticks, and an applier into a two-thread pipeline:
//!
//! ```text
//!   socket -> reader thread -> SPSC queue -> applier thread -> callback
//! ```
//!
//! The reader owns the socket and the reassembly buffer; the applier owns
//! the latency histograms and invokes the registered callback. Shutdown is
//! cooperative: an atomic stop flag plus a socket shutdown to unblock the
//! reader. There is no sleeping primitive on the hot path — both threads
//! yield when their queue end stalls.
//!
//! The codec is a compile-time parameter of the reader, so protocol choice
//! costs one branch at `start`, not dynamic dispatch per message.

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::book::{OrderBook, Side};
use crate::clock::now_ns;
use crate::protocol::{self, BookLevel, MessageType, WireError, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::queue::spsc;
use crate::reassembly::RecvBuffer;
use crate::sequence::SequenceTracker;
use crate::stats::{LatencyBreakdown, LatencySummary};
use crate::text::{self, LineBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Text,
    Binary,
}

/// Configuration consumed by the pipeline. Parsing and file loading belong
/// to the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub queue_capacity: usize,
    pub heartbeat_timeout_s: u64,
    pub max_backoff_s: u64,
    pub verbose: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            protocol: Protocol::Binary,
            queue_capacity: 64 * 1024,
            heartbeat_timeout_s: 2,
            max_backoff_s: 30,
            verbose: false,
        }
    }
}

impl FeedConfig {
    pub fn is_valid(&self) -> bool {
        self.port != 0
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_s)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_s)
    }
}

/// Unified tick, independent of the ingress protocol. The binary wire's
/// f32 price and i32 volume are promoted; the text wire's 7-byte symbol
/// fits the 8-byte storage with its terminating zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub timestamp: u64,
    pub symbol: [u8; 8],
    pub price: f64,
    pub volume: i64,
}

impl Tick {
    pub fn symbol_str(&self) -> &str {
        let end = self.symbol.iter().position(|&b| b == 0).unwrap_or(8);
        std::str::from_utf8(&self.symbol[..end]).unwrap_or("")
    }

    pub(crate) fn from_wire(payload: &protocol::TickPayload) -> Self {
        let mut symbol = [0u8; 8];
        symbol[..protocol::SYMBOL_LEN].copy_from_slice(&payload.symbol);
        Tick {
            timestamp: payload.timestamp,
            symbol,
            price: payload.price as f64,
            volume: payload.volume as i64,
        }
    }

    pub(crate) fn from_text(tick: &text::TextTick) -> Self {
        Tick {
            timestamp: tick.timestamp,
            symbol: tick.symbol,
            price: tick.price,
            volume: tick.volume,
        }
    }
}

/// A tick plus the two timestamps the applier turns into latency samples:
/// the monotonic reading taken right after `recv` returned, and the one
/// taken when parsing finished.
#[derive(Debug, Clone, Copy)]
pub struct TimedTick {
    pub tick: Tick,
    pub recv_timestamp_ns: u64,
    pub parse_timestamp_ns: u64,
}

/// Codec capability of the reader: drain every complete frame currently in
/// the reassembly buffer, handing parsed ticks to `sink`. A returned error
/// is a fatal framing error that invalidates the connection.
pub trait FrameDecoder: Send + 'static {
    fn drain<F: FnMut(TimedTick)>(
        &mut self,
        buf: &mut RecvBuffer,
        recv_timestamp_ns: u64,
        sink: F,
    ) -> Result<(), WireError>;

    fn messages_parsed(&self) -> u64;
    fn parse_errors(&self) -> u64;
    fn gaps_detected(&self) -> u64;
    fn heartbeats(&self) -> u64;
}

/// Framed binary protocol decoder with sequence tracking.
pub struct BinaryDecoder {
    tracker: SequenceTracker,
    messages_parsed: u64,
    parse_errors: u64,
    heartbeats: u64,
    skipped: u64,
    scratch: Box<[u8; HEADER_SIZE + MAX_PAYLOAD_SIZE]>,
}

impl BinaryDecoder {
    pub fn new() -> Self {
        BinaryDecoder {
            tracker: SequenceTracker::new(),
            messages_parsed: 0,
            parse_errors: 0,
            heartbeats: 0,
            skipped: 0,
            scratch: Box::new([0u8; HEADER_SIZE + MAX_PAYLOAD_SIZE]),
        }
    }
}

impl Default for BinaryDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for BinaryDecoder {
    fn drain<F: FnMut(TimedTick)>(
        &mut self,
        buf: &mut RecvBuffer,
        recv_timestamp_ns: u64,
        mut sink: F,
    ) -> Result<(), WireError> {
        loop {
            if buf.available() < HEADER_SIZE {
                return Ok(());
            }

            let mut header_bytes = [0u8; HEADER_SIZE];
            if !buf.peek_bytes(&mut header_bytes) {
                return Ok(());
            }
            let header = match protocol::decode_header(&header_bytes) {
                Ok(h) => h,
                Err(e) => {
                    self.parse_errors += 1;
                    return Err(e);
                }
            };

            let total = header.total_size();
            if buf.available() < total {
                return Ok(());
            }

            let frame = &mut self.scratch[..total];
            if !buf.read_bytes(frame) {
                return Ok(());
            }
            let payload = &frame[HEADER_SIZE..];

            // Snapshot responses sit outside the sequenced stream.
            if header.msg_type != MessageType::SnapshotResponse {
                self.tracker.process(header.sequence);
            }

            match header.msg_type {
                MessageType::Tick | MessageType::RetransmitResponse => {
                    let tick = protocol::decode_tick_payload(payload).map_err(|e| {
                        self.parse_errors += 1;
                        e
                    })?;
                    self.messages_parsed += 1;
                    sink(TimedTick {
                        tick: Tick::from_wire(&tick),
                        recv_timestamp_ns,
                        parse_timestamp_ns: now_ns(),
                    });
                }
                MessageType::Heartbeat => {
                    protocol::decode_heartbeat_payload(payload).map_err(|e| {
                        self.parse_errors += 1;
                        e
                    })?;
                    self.heartbeats += 1;
                    self.messages_parsed += 1;
                }
                _ => {
                    // Book and control frames are handled by the snapshot
                    // client and sidecar; the tick pipeline skips them.
                    self.skipped += 1;
                    self.messages_parsed += 1;
                }
            }
        }
    }

    fn messages_parsed(&self) -> u64 {
        self.messages_parsed
    }

    fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn gaps_detected(&self) -> u64 {
        self.tracker.gaps_detected()
    }

    fn heartbeats(&self) -> u64 {
        self.heartbeats
    }
}

/// Newline-delimited text protocol decoder. Bad lines are counted and
/// dropped; the stream always continues.
pub struct TextDecoder {
    lines: LineBuffer,
    messages_parsed: u64,
    parse_errors: u64,
}

impl TextDecoder {
    pub fn new() -> Self {
        TextDecoder {
            lines: LineBuffer::new(),
            messages_parsed: 0,
            parse_errors: 0,
        }
    }
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for TextDecoder {
    fn drain<F: FnMut(TimedTick)>(
        &mut self,
        buf: &mut RecvBuffer,
        recv_timestamp_ns: u64,
        mut sink: F,
    ) -> Result<(), WireError> {
        let mut chunk = [0u8; 4096];

        while buf.available() > 0 {
            let n = buf.available().min(chunk.len());
            if !buf.read_bytes(&mut chunk[..n]) {
                return Ok(());
            }

            if !self.lines.append(&chunk[..n]) {
                warn!("text line buffer overflow, dropping pending data");
                self.lines.reset();
                self.parse_errors += 1;
                continue;
            }

            while let Some(line) = self.lines.next_line() {
                let parsed = std::str::from_utf8(line)
                    .ok()
                    .and_then(|s| text::parse_tick_line(s).ok());

                match parsed {
                    Some(tick) => {
                        self.messages_parsed += 1;
                        sink(TimedTick {
                            tick: Tick::from_text(&tick),
                            recv_timestamp_ns,
                            parse_timestamp_ns: now_ns(),
                        });
                    }
                    None => self.parse_errors += 1,
                }
            }
        }
        Ok(())
    }

    fn messages_parsed(&self) -> u64 {
        self.messages_parsed
    }

    fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn gaps_detected(&self) -> u64 {
        0
    }

    fn heartbeats(&self) -> u64 {
        0
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ReaderReport {
    messages_parsed: u64,
    parse_errors: u64,
    gaps_detected: u64,
    heartbeats: u64,
    bytes_received: u64,
}

#[derive(Debug, Default)]
struct ApplierReport {
    messages_processed: u64,
    latency: LatencyBreakdown,
}

/// Final pipeline report.
#[derive(Debug, Clone)]
pub struct FeedStats {
    pub duration_ms: f64,
    pub messages_parsed: u64,
    pub messages_processed: u64,
    pub parse_errors: u64,
    pub gaps_detected: u64,
    pub heartbeats: u64,
    pub bytes_received: u64,
    pub throughput_msgs_per_sec: f64,
    pub recv_to_parse: Option<LatencySummary>,
    pub parse_to_process: Option<LatencySummary>,
    pub end_to_end: Option<LatencySummary>,
}

impl FeedStats {
    pub fn log_summary(&self) {
        info!(
            duration_ms = self.duration_ms,
            parsed = self.messages_parsed,
            processed = self.messages_processed,
            parse_errors = self.parse_errors,
            gaps = self.gaps_detected,
            throughput = self.throughput_msgs_per_sec,
            "feed handler summary"
        );
        if let Some(e2e) = &self.end_to_end {
            info!(
                mean_us = e2e.mean_ns / 1000.0,
                p50_us = e2e.p50_ns as f64 / 1000.0,
                p95_us = e2e.p95_ns as f64 / 1000.0,
                p99_us = e2e.p99_ns as f64 / 1000.0,
                "end-to-end latency"
            );
        }
    }
}

pub type TickCallback = Box<dyn FnMut(&Tick) + Send>;

fn run_reader<D: FrameDecoder>(
    mut stream: TcpStream,
    mut decoder: D,
    tx: spsc::Sender<TimedTick>,
    stop: Arc<AtomicBool>,
    verbose: bool,
) -> ReaderReport {
    let mut buf = RecvBuffer::new();
    let mut bytes_received = 0u64;

    while !stop.load(Ordering::Acquire) {
        let region = buf.writable_region();
        if region.is_empty() {
            // The applier is permanently stalled; nothing recoverable here.
            error!("reassembly buffer full, tearing down connection");
            break;
        }

        match stream.read(region) {
            Ok(0) => {
                if verbose {
                    debug!("server closed connection");
                }
                break;
            }
            Ok(n) => {
                let recv_timestamp_ns = now_ns();
                buf.commit_write(n);
                bytes_received += n as u64;

                let drained = decoder.drain(&mut buf, recv_timestamp_ns, |tick| {
                    let mut item = tick;
                    loop {
                        match tx.push(item) {
                            Ok(()) => break,
                            Err(back) => {
                                if stop.load(Ordering::Acquire) {
                                    break;
                                }
                                item = back;
                                thread::yield_now();
                            }
                        }
                    }
                });
                if let Err(e) = drained {
                    error!(error = %e, "fatal framing error");
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "transport error");
                break;
            }
        }
    }

    stop.store(true, Ordering::Release);
    if verbose {
        debug!(
            parsed = decoder.messages_parsed(),
            errors = decoder.parse_errors(),
            "reader exiting"
        );
    }

    ReaderReport {
        messages_parsed: decoder.messages_parsed(),
        parse_errors: decoder.parse_errors(),
        gaps_detected: decoder.gaps_detected(),
        heartbeats: decoder.heartbeats(),
        bytes_received,
    }
}

fn run_applier(
    rx: spsc::Receiver<TimedTick>,
    stop: Arc<AtomicBool>,
    mut callback: TickCallback,
    verbose: bool,
) -> ApplierReport {
    let mut latency = LatencyBreakdown::with_capacity(1 << 20);
    let mut messages_processed = 0u64;

    loop {
        match rx.pop() {
            Some(timed) => {
                let process_timestamp_ns = now_ns();
                latency.record(
                    timed.recv_timestamp_ns,
                    timed.parse_timestamp_ns,
                    process_timestamp_ns,
                );
                callback(&timed.tick);
                messages_processed += 1;

                if verbose && messages_processed % 100_000 == 0 {
                    debug!(
                        processed = messages_processed,
                        symbol = timed.tick.symbol_str(),
                        price = timed.tick.price,
                        "applier progress"
                    );
                }
            }
            None => {
                if stop.load(Ordering::Acquire) && rx.is_empty() {
                    break;
                }
                thread::yield_now();
            }
        }
    }

    ApplierReport {
        messages_processed,
        latency,
    }
}

pub struct FeedHandler {
    config: FeedConfig,
    callback: Option<TickCallback>,
    stop: Arc<AtomicBool>,
    shutdown_stream: Option<TcpStream>,
    reader_handle: Option<JoinHandle<ReaderReport>>,
    applier_handle: Option<JoinHandle<ApplierReport>>,
    started_at: Option<Instant>,
    stats: Option<FeedStats>,
}

impl FeedHandler {
    pub fn new(config: FeedConfig) -> Self {
        FeedHandler {
            config,
            callback: None,
            stop: Arc::new(AtomicBool::new(false)),
            shutdown_stream: None,
            reader_handle: None,
            applier_handle: None,
            started_at: None,
            stats: None,
        }
    }

    /// Register the per-tick callback. Runs on the applier thread. Must be
    /// set before `start`.
    pub fn set_tick_callback(&mut self, callback: impl FnMut(&Tick) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Connect and launch the reader and applier threads.
    pub fn start(&mut self) -> io::Result<()> {
        if self.reader_handle.is_some() {
            return Ok(());
        }

        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port))?;
        let _ = stream.set_nodelay(true);
        stream.set_nonblocking(true)?;
        self.shutdown_stream = Some(stream.try_clone()?);

        self.stop.store(false, Ordering::Release);
        self.stats = None;
        self.started_at = Some(Instant::now());

        let (tx, rx) = spsc::channel(self.config.queue_capacity);
        let verbose = self.config.verbose;

        let callback = self.callback.take().unwrap_or_else(|| Box::new(|_| {}));
        let applier_stop = Arc::clone(&self.stop);
        self.applier_handle = Some(thread::spawn(move || {
            run_applier(rx, applier_stop, callback, verbose)
        }));

        let reader_stop = Arc::clone(&self.stop);
        self.reader_handle = Some(match self.config.protocol {
            Protocol::Binary => thread::spawn(move || {
                run_reader(stream, BinaryDecoder::new(), tx, reader_stop, verbose)
            }),
            Protocol::Text => thread::spawn(move || {
                run_reader(stream, TextDecoder::new(), tx, reader_stop, verbose)
            }),
        });

        info!(
            host = %self.config.host,
            port = self.config.port,
            protocol = ?self.config.protocol,
            "feed handler started"
        );
        Ok(())
    }

    /// Join both threads (reader first, then applier once the queue is
    /// drained) and assemble the final report.
    pub fn wait(&mut self) {
        let reader = match self.reader_handle.take() {
            Some(handle) => match handle.join() {
                Ok(report) => report,
                Err(_) => {
                    error!("reader thread panicked");
                    ReaderReport::default()
                }
            },
            None => return,
        };

        self.stop.store(true, Ordering::Release);

        let applier = match self.applier_handle.take() {
            Some(handle) => match handle.join() {
                Ok(report) => report,
                Err(_) => {
                    error!("applier thread panicked");
                    ApplierReport::default()
                }
            },
            None => ApplierReport::default(),
        };

        let duration_ms = self
            .started_at
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        let throughput = if duration_ms > 0.0 {
            reader.messages_parsed as f64 * 1000.0 / duration_ms
        } else {
            0.0
        };

        self.stats = Some(FeedStats {
            duration_ms,
            messages_parsed: reader.messages_parsed,
            messages_processed: applier.messages_processed,
            parse_errors: reader.parse_errors,
            gaps_detected: reader.gaps_detected,
            heartbeats: reader.heartbeats,
            bytes_received: reader.bytes_received,
            throughput_msgs_per_sec: throughput,
            recv_to_parse: applier.latency.recv_to_parse.summary(),
            parse_to_process: applier.latency.parse_to_process.summary(),
            end_to_end: applier.latency.end_to_end.summary(),
        });
        self.shutdown_stream = None;
    }

    /// Signal stop, unblock the reader by shutting the socket down, and
    /// join both threads.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(stream) = &self.shutdown_stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.wait();
    }

    pub fn is_running(&self) -> bool {
        self.reader_handle.is_some()
    }

    /// Final statistics; available after `wait` or `stop`.
    pub fn stats(&self) -> Option<&FeedStats> {
        self.stats.as_ref()
    }
}

impl Drop for FeedHandler {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

/// Pipeline variant that routes ticks into per-symbol books. The applier
/// writes; external readers take the shared read lock and copy what they
/// need.
pub struct BookFeedHandler {
    handler: FeedHandler,
    books: Arc<RwLock<HashMap<String, OrderBook>>>,
}

impl BookFeedHandler {
    pub fn new(config: FeedConfig) -> Self {
        let books: Arc<RwLock<HashMap<String, OrderBook>>> = Arc::default();
        let mut handler = FeedHandler::new(config);

        let sink = Arc::clone(&books);
        handler.set_tick_callback(move |tick| {
            let mut books = sink.write();
            let book = books.entry(tick.symbol_str().to_owned()).or_default();
            book.apply_update(Side::Bid, tick.price as f32, tick.volume);
        });

        BookFeedHandler { handler, books }
    }

    pub fn start(&mut self) -> io::Result<()> {
        self.handler.start()
    }

    pub fn wait(&mut self) {
        self.handler.wait()
    }

    pub fn stop(&mut self) {
        self.handler.stop()
    }

    pub fn stats(&self) -> Option<&FeedStats> {
        self.handler.stats()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }

    pub fn best_bid(&self, symbol: &str) -> Option<(f32, u64)> {
        self.books.read().get(symbol).and_then(|b| b.best_bid())
    }

    /// Copy of the top `n` levels of both sides for one symbol.
    pub fn top_of_book(&self, symbol: &str, n: usize) -> Option<(Vec<BookLevel>, Vec<BookLevel>)> {
        self.books
            .read()
            .get(symbol)
            .map(|b| (b.top_bids(n), b.top_asks(n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = FeedConfig::default();
        assert!(!config.is_valid());
        assert_eq!(config.protocol, Protocol::Binary);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(2));
        assert_eq!(config.max_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn test_tick_symbol_str() {
        let tick = Tick::from_wire(&protocol::TickPayload {
            timestamp: 1,
            symbol: *b"IBM\0",
            price: 1.5,
            volume: 2,
        });
        assert_eq!(tick.symbol_str(), "IBM");
        assert_eq!(tick.price, 1.5);
        assert_eq!(tick.volume, 2);
    }

    #[test]
    fn test_binary_decoder_partial_then_complete() {
        let mut decoder = BinaryDecoder::new();
        let mut buf = RecvBuffer::new();
        let msg = protocol::encode_tick(1, 100, b"AAPL", 10.0, 5);

        // First half of the frame: no output, no error.
        let region = buf.writable_region();
        region[..7].copy_from_slice(&msg[..7]);
        buf.commit_write(7);

        let mut ticks = Vec::new();
        decoder.drain(&mut buf, 1, |t| ticks.push(t)).unwrap();
        assert!(ticks.is_empty());

        // Remainder: exactly one tick.
        let region = buf.writable_region();
        region[..msg.len() - 7].copy_from_slice(&msg[7..]);
        buf.commit_write(msg.len() - 7);

        decoder.drain(&mut buf, 2, |t| ticks.push(t)).unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].tick.symbol_str(), "AAPL");
        assert_eq!(decoder.messages_parsed(), 1);
    }

    #[test]
    fn test_binary_decoder_unknown_type_fatal() {
        let mut decoder = BinaryDecoder::new();
        let mut buf = RecvBuffer::new();

        let mut msg = protocol::encode_tick(1, 100, b"AAPL", 10.0, 5);
        msg[4] = 0x42;
        let region = buf.writable_region();
        region[..msg.len()].copy_from_slice(&msg);
        buf.commit_write(msg.len());

        let result = decoder.drain(&mut buf, 1, |_| {});
        assert_eq!(result, Err(WireError::UnknownType(0x42)));
        assert_eq!(decoder.parse_errors(), 1);
    }

    #[test]
    fn test_text_decoder_counts_bad_lines() {
        let mut decoder = TextDecoder::new();
        let mut buf = RecvBuffer::new();

        let input = b"1 AAPL 100 10\nbad line\n2 AAPL 101 15\n";
        let region = buf.writable_region();
        region[..input.len()].copy_from_slice(input);
        buf.commit_write(input.len());

        let mut ticks = Vec::new();
        decoder.drain(&mut buf, 1, |t| ticks.push(t)).unwrap();

        assert_eq!(ticks.len(), 2);
        assert_eq!(decoder.messages_parsed(), 2);
        assert_eq!(decoder.parse_errors(), 1);
    }
}
