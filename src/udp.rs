//! UDP feed sidecar with gap recovery over a reliable control channel.
//!
//! The UDP socket carries TICK frames, best effort: dropped, duplicated,
//! or reordered. A TCP connection to the same source is the control
//! channel — retransmit requests go out, TICK-shaped retransmit responses
//! come back. Once per cycle the sidecar coalesces the missing-sequence
//! set into ranges and requests a bounded number of them, so control
//! traffic cannot balloon under heavy loss. Frames on UDP whose type is
//! not TICK are silently ignored; the TCP control channel keeps strict
//! framing.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::now_ns;
use crate::gap::{GapEvent, GapTracker};
use crate::handler::{Tick, TickCallback};
use crate::protocol::{self, MessageType, HEADER_SIZE};
use crate::reassembly::RecvBuffer;
use crate::stats::LatencyStats;

const UDP_DATAGRAM_MAX: usize = 2048;

#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub host: String,
    /// Local port the UDP feed is received on.
    pub udp_port: u16,
    /// Remote port of the reliable control channel.
    pub control_port: u16,
    /// How often the gap set is scanned for retransmit requests.
    pub retransmit_interval: Duration,
    /// Upper bound on retransmit requests per cycle.
    pub max_requests_per_cycle: usize,
    /// How long to keep draining the control channel after the feed ends.
    pub final_drain: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            host: "127.0.0.1".to_string(),
            udp_port: 0,
            control_port: 0,
            retransmit_interval: Duration::from_secs(1),
            max_requests_per_cycle: 5,
            final_drain: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
pub struct UdpFeedStats {
    pub messages_received: u64,
    pub gaps_detected: u64,
    pub gaps_filled: u64,
    pub duplicates: u64,
    pub ignored_frames: u64,
    pub retransmit_requests_sent: u64,
    pub latency: LatencyStats,
}

pub struct UdpFeedHandler {
    config: UdpConfig,
    udp: Option<UdpSocket>,
    control: Option<TcpStream>,
    control_buf: RecvBuffer,
    tracker: GapTracker,
    stats: UdpFeedStats,
    stop: Arc<AtomicBool>,
    callback: Option<TickCallback>,
}

impl UdpFeedHandler {
    pub fn new(config: UdpConfig) -> Self {
        UdpFeedHandler {
            config,
            udp: None,
            control: None,
            control_buf: RecvBuffer::new(),
            tracker: GapTracker::new(),
            stats: UdpFeedStats::default(),
            stop: Arc::new(AtomicBool::new(false)),
            callback: None,
        }
    }

    /// Invoked for every delivered tick — live and retransmitted alike.
    pub fn set_tick_callback(&mut self, callback: impl FnMut(&Tick) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Bind the UDP socket and connect the control channel.
    pub fn start(&mut self) -> io::Result<()> {
        let udp = UdpSocket::bind(("0.0.0.0", self.config.udp_port))?;
        udp.set_nonblocking(true)?;

        let control = TcpStream::connect((self.config.host.as_str(), self.config.control_port))?;
        let _ = control.set_nodelay(true);
        control.set_nonblocking(true)?;

        info!(
            udp_port = udp.local_addr()?.port(),
            control_port = self.config.control_port,
            "udp feed handler started"
        );

        self.udp = Some(udp);
        self.control = Some(control);
        Ok(())
    }

    /// The local port the UDP socket actually bound (for port-0 configs).
    pub fn local_udp_port(&self) -> Option<u16> {
        self.udp
            .as_ref()
            .and_then(|u| u.local_addr().ok())
            .map(|a| a.port())
    }

    /// Receive for `duration` (or until the stop flag), requesting
    /// retransmits each cycle, then make a final retransmit pass and keep
    /// draining the control channel for the configured window.
    pub fn run(&mut self, duration: Duration) {
        let start = Instant::now();
        let mut last_gap_check = start;

        while !self.stop.load(Ordering::Acquire) && start.elapsed() < duration {
            self.receive_udp();

            if last_gap_check.elapsed() >= self.config.retransmit_interval {
                self.request_retransmits();
                last_gap_check = Instant::now();
            }

            self.receive_control();
            thread::sleep(Duration::from_micros(100));
        }

        // Last chance for outstanding gaps before declaring them lost.
        self.request_retransmits();
        let drain_start = Instant::now();
        while drain_start.elapsed() < self.config.final_drain && self.tracker.active_gaps() > 0 {
            self.receive_control();
            thread::sleep(Duration::from_millis(10));
        }

        info!(
            received = self.stats.messages_received,
            gaps = self.stats.gaps_detected,
            filled = self.stats.gaps_filled,
            unrecovered = self.tracker.active_gaps(),
            "udp feed finished"
        );
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(control) = self.control.take() {
            let _ = control.shutdown(Shutdown::Both);
        }
        self.udp = None;
    }

    fn receive_udp(&mut self) {
        let mut datagram = [0u8; UDP_DATAGRAM_MAX];

        loop {
            let Some(udp) = self.udp.as_ref() else { return };
            match udp.recv(&mut datagram) {
                Ok(n) => {
                    let recv_timestamp_ns = now_ns();
                    self.handle_datagram(&datagram[..n], recv_timestamp_ns);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "udp recv failed");
                    return;
                }
            }
        }
    }

    fn handle_datagram(&mut self, frame: &[u8], recv_timestamp_ns: u64) {
        if frame.len() < HEADER_SIZE {
            self.stats.ignored_frames += 1;
            return;
        }

        // A malformed or non-TICK datagram is dropped without ceremony;
        // there is no connection to invalidate on UDP.
        let header = match protocol::decode_header(frame) {
            Ok(h) => h,
            Err(_) => {
                self.stats.ignored_frames += 1;
                return;
            }
        };
        if header.msg_type != MessageType::Tick || frame.len() < header.total_size() {
            self.stats.ignored_frames += 1;
            return;
        }

        match self.tracker.observe(header.sequence) {
            GapEvent::Gap(n) => self.stats.gaps_detected += n,
            GapEvent::Filled => self.stats.gaps_filled += 1,
            GapEvent::Duplicate => {
                self.stats.duplicates += 1;
                return;
            }
            GapEvent::First | GapEvent::InOrder => {}
        }

        let Ok(payload) = protocol::decode_tick_payload(&frame[HEADER_SIZE..header.total_size()])
        else {
            self.stats.ignored_frames += 1;
            return;
        };

        self.deliver(&Tick::from_wire(&payload), recv_timestamp_ns);
    }

    fn receive_control(&mut self) {
        loop {
            let Some(control) = self.control.as_ref() else { return };

            let region = self.control_buf.writable_region();
            if region.is_empty() {
                warn!("control channel reassembly buffer full");
                self.stop.store(true, Ordering::Release);
                return;
            }

            let mut control_ref = control;
            match control_ref.read(region) {
                Ok(0) => {
                    warn!("control channel closed");
                    self.stop.store(true, Ordering::Release);
                    return;
                }
                Ok(n) => {
                    let recv_timestamp_ns = now_ns();
                    self.control_buf.commit_write(n);
                    if !self.process_control_frames(recv_timestamp_ns) {
                        self.stop.store(true, Ordering::Release);
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "control recv failed");
                    self.stop.store(true, Ordering::Release);
                    return;
                }
            }
        }
    }

    /// Returns false on a framing error — fatal on the TCP control path.
    fn process_control_frames(&mut self, recv_timestamp_ns: u64) -> bool {
        let mut frame = [0u8; HEADER_SIZE + protocol::MAX_PAYLOAD_SIZE];

        loop {
            if self.control_buf.available() < HEADER_SIZE {
                return true;
            }

            let mut header_bytes = [0u8; HEADER_SIZE];
            if !self.control_buf.peek_bytes(&mut header_bytes) {
                return true;
            }
            let header = match protocol::decode_header(&header_bytes) {
                Ok(h) => h,
                Err(e) => {
                    warn!(error = %e, "framing error on control channel");
                    return false;
                }
            };

            let total = header.total_size();
            if self.control_buf.available() < total {
                return true;
            }
            if !self.control_buf.read_bytes(&mut frame[..total]) {
                return true;
            }

            match header.msg_type {
                MessageType::Tick | MessageType::RetransmitResponse => {
                    let Ok(payload) =
                        protocol::decode_tick_payload(&frame[HEADER_SIZE..total])
                    else {
                        return false;
                    };

                    match self.tracker.observe(header.sequence) {
                        GapEvent::Filled => {
                            self.stats.gaps_filled += 1;
                            debug!(
                                sequence = header.sequence,
                                remaining = self.tracker.active_gaps(),
                                "retransmit filled gap"
                            );
                            self.deliver(&Tick::from_wire(&payload), recv_timestamp_ns);
                        }
                        GapEvent::First | GapEvent::InOrder | GapEvent::Gap(_) => {
                            self.deliver(&Tick::from_wire(&payload), recv_timestamp_ns);
                        }
                        GapEvent::Duplicate => self.stats.duplicates += 1,
                    }
                }
                MessageType::Heartbeat => {
                    debug!(sequence = header.sequence, "control heartbeat");
                }
                _ => {
                    self.stats.ignored_frames += 1;
                }
            }
        }
    }

    fn deliver(&mut self, tick: &Tick, recv_timestamp_ns: u64) {
        self.stats.messages_received += 1;
        if let Some(callback) = self.callback.as_mut() {
            callback(tick);
        }
        self.stats.latency.record(now_ns().saturating_sub(recv_timestamp_ns));
    }

    fn request_retransmits(&mut self) {
        let ranges = self.tracker.gap_ranges();
        if ranges.is_empty() {
            return;
        }

        let Some(control) = self.control.as_ref() else { return };
        let mut control_ref = control;

        for &(start, end) in ranges.iter().take(self.config.max_requests_per_cycle) {
            info!(start, end, "requesting retransmit");
            let request = protocol::encode_retransmit_request(0, start, end);
            if let Err(e) = control_ref.write_all(&request) {
                warn!(error = %e, "failed to send retransmit request");
                return;
            }
            self.stats.retransmit_requests_sent += 1;
        }
    }

    pub fn stats(&self) -> &UdpFeedStats {
        &self.stats
    }

    pub fn tracker(&self) -> &GapTracker {
        &self.tracker
    }
}
