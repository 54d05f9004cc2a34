//! Sequence number tracking for ordered transports.
//!
//! Classifies each incoming sequence number against the last one seen and
//! counts gap events. On TCP a gap is informational only: the transport
//! orders bytes, so a missing sequence means the producer skipped it and no
//! retransmission can recover it.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqStatus {
    /// First sequence number observed since construction or `reset`.
    First,
    /// Exactly the expected next sequence.
    InOrder,
    /// Jumped forward; carries the number of missing sequences.
    Gap(u64),
    /// At or behind the last seen sequence; state is not updated.
    DuplicateOrOld,
}

#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    last_sequence: Option<u64>,
    gaps_detected: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        SequenceTracker {
            last_sequence: None,
            gaps_detected: 0,
        }
    }

    pub fn process(&mut self, sequence: u64) -> SeqStatus {
        let last = match self.last_sequence {
            None => {
                self.last_sequence = Some(sequence);
                return SeqStatus::First;
            }
            Some(last) => last,
        };

        let expected = last.wrapping_add(1);
        if sequence == expected {
            self.last_sequence = Some(sequence);
            return SeqStatus::InOrder;
        }

        if sequence > expected {
            let missing = sequence - expected;
            self.gaps_detected += 1;
            warn!(
                expected,
                got = sequence,
                missing,
                "sequence gap detected"
            );
            self.last_sequence = Some(sequence);
            return SeqStatus::Gap(missing);
        }

        // Out-of-order or duplicate: last_sequence stays put.
        warn!(expected, got = sequence, "out-of-order sequence");
        SeqStatus::DuplicateOrOld
    }

    /// Forget the last sequence (reconnect). The gap counter is cumulative
    /// across resets to preserve operational visibility.
    pub fn reset(&mut self) {
        self.last_sequence = None;
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    pub fn has_received(&self) -> bool {
        self.last_sequence.is_some()
    }
}
