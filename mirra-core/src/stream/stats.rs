//! Frame counters shared between the transport loop and a presentation
//! context.
//!
//! Exactly one loop writes (the transmitter on the producer, the receive
//! loop on the consumer) while an overlay may read at any time. Every
//! access, reads included, goes through the same mutex.

use std::sync::{Arc, Mutex, MutexGuard};

// ── StreamStats ──────────────────────────────────────────────────

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames fully handed to the socket.
    pub sent: u64,
    /// Frames received, validated and delivered.
    pub received: u64,
    /// Frames discarded on receipt plus sequence gaps.
    pub dropped: u64,
    /// Producer iterations that overran the frame interval.
    pub late: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Sequence number of the last delivered frame in this session.
    pub last_seq: Option<u32>,
}

impl StreamStats {
    /// `dropped / (received + dropped)`, or 0 with nothing counted.
    pub fn loss_rate(&self) -> f64 {
        let total = self.received + self.dropped;
        if total == 0 {
            0.0
        } else {
            self.dropped as f64 / total as f64
        }
    }
}

// ── StatsAccumulator ─────────────────────────────────────────────

/// Cloneable handle to one set of counters.
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    inner: Arc<Mutex<StreamStats>>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StreamStats> {
        // Counters stay usable even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A frame of `bytes` payload bytes went out completely.
    pub fn record_sent(&self, bytes: usize) {
        let mut s = self.lock();
        s.sent += 1;
        s.bytes_sent += bytes as u64;
    }

    /// A producer iteration took longer than its frame interval.
    pub fn record_late(&self) {
        self.lock().late += 1;
    }

    /// A validated frame with sequence `seq` was delivered.
    ///
    /// Any positive gap since the previous delivered sequence number is
    /// counted as dropped frames. Returns the size of that gap.
    pub fn record_received(&self, seq: u32, bytes: usize) -> u64 {
        let mut s = self.lock();
        let gap = match s.last_seq {
            Some(last) => (seq as u64).saturating_sub(last as u64 + 1),
            None => 0,
        };
        s.dropped += gap;
        s.received += 1;
        s.bytes_received += bytes as u64;
        s.last_seq = Some(seq);
        gap
    }

    /// A declared frame was discarded.
    pub fn record_dropped(&self) {
        self.lock().dropped += 1;
    }

    /// Forget the last sequence number; a new session numbers from 0.
    pub fn reset_sequence(&self) {
        self.lock().last_seq = None;
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> StreamStats {
        *self.lock()
    }

    pub fn loss_rate(&self) -> f64 {
        self.lock().loss_rate()
    }
}

// ── Tests ────────────────────────────────────────────────────────
