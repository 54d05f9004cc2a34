//! Latency statistics.
//!
//! An append-only vector of nanosecond samples per pipeline stage. Not
//! thread-safe by design: each thread owns its own instance and the
//! orchestrator merges them at reporting time. Percentiles use the
//! nearest-rank method over a sorted copy.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ns: f64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    samples: Vec<u64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        LatencyStats {
            samples: Vec::with_capacity(n),
        }
    }

    #[inline]
    pub fn record(&mut self, latency_ns: u64) {
        self.samples.push(latency_ns);
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn merge(&mut self, other: &LatencyStats) {
        self.samples.extend_from_slice(&other.samples);
    }

    /// Nearest-rank percentile: `index = ceil(p × n / 100)`, 1-based.
    pub fn percentile(&self, p: u8) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        Some(nearest_rank(&sorted, p))
    }

    pub fn summary(&self) -> Option<LatencySummary> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        Some(LatencySummary {
            count: sorted.len(),
            mean_ns: sum as f64 / sorted.len() as f64,
            min_ns: sorted[0],
            max_ns: sorted[sorted.len() - 1],
            p50_ns: nearest_rank(&sorted, 50),
            p95_ns: nearest_rank(&sorted, 95),
            p99_ns: nearest_rank(&sorted, 99),
        })
    }
}

fn nearest_rank(sorted: &[u64], p: u8) -> u64 {
    debug_assert!(!sorted.is_empty());
    let n = sorted.len();
    let rank = (p as usize * n + 99) / 100;
    sorted[rank.max(1) - 1]
}

/// Per-stage breakdown the applier thread records into:
/// recv → parse (network + decode), parse → process (queue dwell), and the
/// end-to-end total.
#[derive(Debug, Clone, Default)]
pub struct LatencyBreakdown {
    pub recv_to_parse: LatencyStats,
    pub parse_to_process: LatencyStats,
    pub end_to_end: LatencyStats,
}

impl LatencyBreakdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        LatencyBreakdown {
            recv_to_parse: LatencyStats::with_capacity(n),
            parse_to_process: LatencyStats::with_capacity(n),
            end_to_end: LatencyStats::with_capacity(n),
        }
    }

    #[inline]
    pub fn record(&mut self, recv_ts: u64, parse_ts: u64, process_ts: u64) {
        self.recv_to_parse.record(parse_ts.saturating_sub(recv_ts));
        self.parse_to_process
            .record(process_ts.saturating_sub(parse_ts));
        self.end_to_end.record(process_ts.saturating_sub(recv_ts));
    }

    pub fn merge(&mut self, other: &LatencyBreakdown) {
        self.recv_to_parse.merge(&other.recv_to_parse);
        self.parse_to_process.merge(&other.parse_to_process);
        self.end_to_end.merge(&other.end_to_end);
    }
}
