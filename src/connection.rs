//! Connection lifecycle for the TCP feed.
//!
//! A small state machine drives snapshot recovery:
//! `Disconnected → Connecting → Connected → SnapshotRequest →
//! SnapshotReplay → Incremental`, with `Reconnecting` on the backoff path.
//! Every transition not listed here is a no-op. The manager is touched only
//! by the reader thread.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    SnapshotRequest,
    SnapshotReplay,
    Incremental,
    Reconnecting,
}

impl ConnState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnState::Disconnected => "DISCONNECTED",
            ConnState::Connecting => "CONNECTING",
            ConnState::Connected => "CONNECTED",
            ConnState::SnapshotRequest => "SNAPSHOT_REQUEST",
            ConnState::SnapshotReplay => "SNAPSHOT_REPLAY",
            ConnState::Incremental => "INCREMENTAL",
            ConnState::Reconnecting => "RECONNECTING",
        }
    }
}

pub struct ConnectionManager {
    host: String,
    port: u16,
    heartbeat_timeout: Duration,
    max_backoff: Duration,

    state: ConnState,
    stream: Option<TcpStream>,
    reconnect_attempts: u32,
    current_backoff: Duration,
    last_message_time: Instant,
    snapshot_requested: bool,
}

impl ConnectionManager {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_timeouts(host, port, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_BACKOFF)
    }

    pub fn with_timeouts(
        host: impl Into<String>,
        port: u16,
        heartbeat_timeout: Duration,
        max_backoff: Duration,
    ) -> Self {
        ConnectionManager {
            host: host.into(),
            port,
            heartbeat_timeout,
            max_backoff,
            state: ConnState::Disconnected,
            stream: None,
            reconnect_attempts: 0,
            current_backoff: INITIAL_BACKOFF,
            last_message_time: Instant::now(),
            snapshot_requested: false,
        }
    }

    /// Establish the TCP connection. Success resets backoff and the
    /// reconnect count and clears the snapshot-requested latch; failure
    /// leaves the manager `Disconnected`.
    pub fn connect(&mut self) -> io::Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = ConnState::Connecting;
        info!(host = %self.host, port = self.port, "connecting");

        match TcpStream::connect((self.host.as_str(), self.port)) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                stream.set_nonblocking(true)?;

                self.stream = Some(stream);
                self.state = ConnState::Connected;
                self.reconnect_attempts = 0;
                self.current_backoff = INITIAL_BACKOFF;
                self.last_message_time = Instant::now();
                self.snapshot_requested = false;

                info!("connected");
                Ok(())
            }
            Err(e) => {
                self.state = ConnState::Disconnected;
                warn!(error = %e, "connection failed");
                Err(e)
            }
        }
    }

    /// Tear down and retry after the current backoff, doubling it up to
    /// the maximum. All prior book state is stale after a reconnect: the
    /// caller resets its sequence tracker and re-enters snapshot request.
    pub fn reconnect(&mut self) -> io::Result<()> {
        self.disconnect();

        self.reconnect_attempts += 1;
        self.state = ConnState::Reconnecting;
        info!(
            attempt = self.reconnect_attempts,
            backoff_s = self.current_backoff.as_secs_f64(),
            "reconnecting"
        );

        thread::sleep(self.current_backoff);
        self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);

        self.connect()
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if self.state != ConnState::Reconnecting {
            self.state = ConnState::Disconnected;
        }
    }

    pub fn transition_to_snapshot_request(&mut self) {
        if self.state == ConnState::Connected {
            self.state = ConnState::SnapshotRequest;
            self.snapshot_requested = false;
            info!("state: CONNECTED -> SNAPSHOT_REQUEST");
        }
    }

    pub fn mark_snapshot_requested(&mut self) {
        self.snapshot_requested = true;
    }

    pub fn transition_to_snapshot_replay(&mut self) {
        if self.state == ConnState::SnapshotRequest {
            self.state = ConnState::SnapshotReplay;
            info!("state: SNAPSHOT_REQUEST -> SNAPSHOT_REPLAY");
        }
    }

    pub fn transition_to_incremental(&mut self) {
        if self.state == ConnState::SnapshotReplay {
            self.state = ConnState::Incremental;
            info!("state: SNAPSHOT_REPLAY -> INCREMENTAL");
        }
    }

    /// Called by the reader on any byte of a valid frame.
    pub fn update_last_message_time(&mut self) {
        self.last_message_time = Instant::now();
    }

    pub fn is_heartbeat_timeout(&self) -> bool {
        self.last_message_time.elapsed() >= self.heartbeat_timeout
    }

    pub fn seconds_since_last_message(&self) -> f64 {
        self.last_message_time.elapsed().as_secs_f64()
    }

    pub fn needs_snapshot_request(&self) -> bool {
        self.state == ConnState::SnapshotRequest && !self.snapshot_requested
    }

    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnState::Connected
                | ConnState::SnapshotRequest
                | ConnState::SnapshotReplay
                | ConnState::Incremental
        )
    }

    pub fn is_incremental(&self) -> bool {
        self.state == ConnState::Incremental
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
