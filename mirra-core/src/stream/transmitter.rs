//! Producer-side frame transmission.
//!
//! A frame goes out as its metadata datagram followed by its chunks,
//! back to back, with a small fixed gap between chunks so neither socket
//! buffer is overrun. If the transport rejects a datagram as too large,
//! the packet size shrinks for good and the frame is abandoned.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{trace, warn};

use crate::error::MirraError;
use crate::stream::metadata::FrameMetadata;
use crate::stream::stats::StatsAccumulator;

// ── Constants ────────────────────────────────────────────────────

/// Initial chunk payload size: Ethernet MTU minus IP/UDP headers, rounded down.
pub const INITIAL_PACKET_SIZE: usize = 1400;

/// Smallest datagram every IPv4 path carries without fragmentation.
pub const MIN_PACKET_SIZE: usize = 508;

/// How much the packet size shrinks per oversize failure.
pub const PACKET_SIZE_STEP: usize = 100;

/// Default gap between consecutive chunks.
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_micros(500);

/// Coarsest sleep the runtime timer resolves.
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

// ── PacketSizer ──────────────────────────────────────────────────

/// Current chunk size. Only ever shrinks, never below [`MIN_PACKET_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSizer {
    current: usize,
}

impl PacketSizer {
    pub fn new(initial: usize) -> Self {
        Self {
            current: initial.max(MIN_PACKET_SIZE),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn at_floor(&self) -> bool {
        self.current == MIN_PACKET_SIZE
    }

    /// Step down after an oversize failure. Returns the new size.
    pub fn shrink(&mut self) -> usize {
        self.current = self
            .current
            .saturating_sub(PACKET_SIZE_STEP)
            .max(MIN_PACKET_SIZE);
        self.current
    }
}

impl Default for PacketSizer {
    fn default() -> Self {
        Self::new(INITIAL_PACKET_SIZE)
    }
}

// ── ChunkPacer ───────────────────────────────────────────────────

/// Spreads chunks out by a fixed per-chunk delay.
///
/// Gaps below the timer resolution are accumulated and slept off in one
/// go, keeping the average spacing at `delay`.
#[derive(Debug)]
struct ChunkPacer {
    delay: Duration,
    debt: Duration,
}

impl ChunkPacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            debt: Duration::ZERO,
        }
    }

    async fn gap(&mut self) {
        self.debt += self.delay;
        if self.debt >= TIMER_RESOLUTION {
            tokio::time::sleep(self.debt).await;
            self.debt = Duration::ZERO;
        }
    }
}

/// Whether a send failed because the datagram was too large.
#[cfg(unix)]
pub fn is_message_too_large(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::EMSGSIZE)
}

/// Whether a send failed because the datagram was too large.
#[cfg(windows)]
pub fn is_message_too_large(err: &std::io::Error) -> bool {
    const WSAEMSGSIZE: i32 = 10040;
    err.raw_os_error() == Some(WSAEMSGSIZE)
}

// ── FrameTransmitter ─────────────────────────────────────────────

/// Sends frames of one session to its peer.
///
/// Sequence numbers start at 0 for every transmitter; build a new one per
/// session.
pub struct FrameTransmitter {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    next_sequence: u32,
    sizer: PacketSizer,
    chunk_delay: Duration,
    stats: StatsAccumulator,
}

impl FrameTransmitter {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, stats: StatsAccumulator) -> Self {
        Self {
            socket,
            peer,
            next_sequence: 0,
            sizer: PacketSizer::default(),
            chunk_delay: DEFAULT_CHUNK_DELAY,
            stats,
        }
    }

    /// Start from an existing packet size, e.g. one already shrunk by an
    /// earlier session.
    pub fn with_sizer(mut self, sizer: PacketSizer) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn sizer(&self) -> PacketSizer {
        self.sizer
    }

    /// Sequence number the next frame will carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Send one encoded frame: metadata first, then its chunks in order.
    ///
    /// The sequence number is consumed as soon as the metadata is built,
    /// so an abandoned frame shows up as a gap at the receiver.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<FrameMetadata, MirraError> {
        let chunk_size = self.sizer.current();
        let meta = FrameMetadata::describe(self.next_sequence, frame, chunk_size)?;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.send_datagram(&meta.encode()).await?;

        let mut pacer = ChunkPacer::new(self.chunk_delay);
        for (idx, chunk) in frame.chunks(chunk_size).enumerate() {
            if idx > 0 {
                pacer.gap().await;
            }
            self.send_datagram(chunk).await?;
        }

        trace!(
            "sent frame #{} ({} bytes, {} chunks)",
            meta.sequence, meta.total_size, meta.chunk_count
        );
        self.stats.record_sent(frame.len());
        Ok(meta)
    }

    async fn send_datagram(&mut self, datagram: &[u8]) -> Result<(), MirraError> {
        match self.socket.send_to(datagram, self.peer).await {
            Ok(_) => Ok(()),
            Err(e) if is_message_too_large(&e) => {
                let size = datagram.len();
                let next = self.sizer.shrink();
                warn!("{size}-byte datagram rejected as too large; packet size now {next}");
                Err(MirraError::DatagramTooLarge { size })
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ── Frame pacing ─────────────────────────────────────────────────

/// Sleep for whatever is left of `interval` since `loop_start`.
///
/// Returns `false` without sleeping if the iteration already overran.
pub async fn pace(loop_start: Instant, interval: Duration) -> bool {
    let elapsed = loop_start.elapsed();
    if elapsed < interval {
        tokio::time::sleep(interval - elapsed).await;
        true
    } else {
        false
    }
}

// ── Tests ────────────────────────────────────────────────────────
