//! Consumer-side frame reception.
//!
//! Waits for a metadata datagram, collects exactly the declared number of
//! chunk datagrams in arrival order, validates the result and hands it to
//! the decoder. Validated frames land in a [`FrameSlot`]; anything else is
//! counted and discarded.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::stream::handshake::is_terminate;
use crate::stream::metadata::{FrameMetadata, Reassembly};
use crate::stream::stats::StatsAccumulator;
use crate::stream::transmitter::{INITIAL_PACKET_SIZE, MIN_PACKET_SIZE};
use crate::stream::types::{FrameDecoder, FrameSlot};

/// Slack on top of the packet size when sizing the receive buffer.
pub const RECV_MARGIN: usize = 100;

// ── ReceiverConfig ───────────────────────────────────────────────

/// Timeouts and limits for [`FrameReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Wait for the next metadata datagram.
    pub recv_timeout: Duration,
    /// Wait for each chunk once a frame has started.
    pub chunk_timeout: Duration,
    /// Largest chunk the producer may send.
    pub max_packet_size: usize,
    /// Consecutive metadata timeouts before the session is considered
    /// dead. `None` waits forever.
    pub idle_limit: Option<u32>,
    /// Pause after a socket error before receiving again.
    pub error_backoff: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(2),
            chunk_timeout: Duration::from_millis(500),
            max_packet_size: INITIAL_PACKET_SIZE,
            idle_limit: Some(3),
            error_backoff: Duration::from_millis(100),
        }
    }
}

/// Why [`FrameReceiver::receive_loop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The cancellation token fired.
    Stopped,
    /// The producer announced it is stopping.
    PeerTerminated,
    /// Nothing arrived for `idle_limit` consecutive timeouts.
    Idle,
    /// The socket is unusable.
    Closed,
}

enum Collected {
    Frame(Reassembly),
    Terminated,
    Stopped,
}

// ── FrameReceiver ────────────────────────────────────────────────

/// Receives, validates and publishes frames from one socket.
pub struct FrameReceiver<D> {
    socket: Arc<UdpSocket>,
    decoder: D,
    slot: FrameSlot,
    stats: StatsAccumulator,
    config: ReceiverConfig,
    buf: Vec<u8>,
}

impl<D: FrameDecoder> FrameReceiver<D> {
    /// `socket` should be connected to the producer.
    pub fn new(
        socket: Arc<UdpSocket>,
        decoder: D,
        slot: FrameSlot,
        stats: StatsAccumulator,
        config: ReceiverConfig,
    ) -> Self {
        let buf_len = config.max_packet_size.max(MIN_PACKET_SIZE) + RECV_MARGIN;
        Self {
            socket,
            decoder,
            slot,
            stats,
            config,
            buf: vec![0u8; buf_len],
        }
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    pub fn stats(&self) -> &StatsAccumulator {
        &self.stats
    }

    /// Forget the previous session's sequence numbers.
    pub fn begin_session(&self) {
        self.stats.reset_sequence();
    }

    /// Receive frames until cancelled, terminated, idle or closed.
    pub async fn receive_loop(&mut self, cancel: &CancellationToken) -> ReceiveOutcome {
        let mut idle = 0u32;

        loop {
            let received = tokio::select! {
                r = tokio::time::timeout(self.config.recv_timeout, self.socket.recv(&mut self.buf)) => r,
                _ = cancel.cancelled() => return ReceiveOutcome::Stopped,
            };

            let n = match received {
                Err(_) => {
                    idle += 1;
                    trace!("no frame within {:?} ({idle} in a row)", self.config.recv_timeout);
                    if self.config.idle_limit.is_some_and(|limit| idle >= limit) {
                        info!("producer silent for {idle} timeouts");
                        return ReceiveOutcome::Idle;
                    }
                    continue;
                }
                Ok(Err(e)) if is_closed(&e) => {
                    warn!("socket closed: {e}");
                    return ReceiveOutcome::Closed;
                }
                Ok(Err(e)) => {
                    warn!("receive error: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.error_backoff) => continue,
                        _ = cancel.cancelled() => return ReceiveOutcome::Stopped,
                    }
                }
                Ok(Ok(n)) => n,
            };
            idle = 0;

            let datagram = &self.buf[..n];
            if is_terminate(datagram) {
                info!("producer terminated the session");
                return ReceiveOutcome::PeerTerminated;
            }

            let meta = match FrameMetadata::decode(datagram) {
                Ok(meta) if self.plausible(&meta) => meta,
                Ok(meta) => {
                    debug!(
                        "discarding {n}-byte datagram: {} chunks cannot carry {} bytes",
                        meta.chunk_count, meta.total_size
                    );
                    continue;
                }
                Err(e) => {
                    trace!("discarding datagram: {e}");
                    continue;
                }
            };

            match self.collect_chunks(meta, cancel).await {
                Collected::Frame(reassembly) => {
                    let seq = reassembly.metadata().sequence;
                    match reassembly.finish() {
                        Ok(bytes) => self.deliver(seq, bytes),
                        Err(e) if e.is_frame_local() => {
                            debug!("dropping frame #{seq}: {e}");
                            self.stats.record_dropped();
                        }
                        Err(e) => {
                            warn!("dropping frame #{seq} on unexpected error: {e}");
                            self.stats.record_dropped();
                        }
                    }
                }
                Collected::Terminated => {
                    self.stats.record_dropped();
                    info!("producer terminated the session mid-frame");
                    return ReceiveOutcome::PeerTerminated;
                }
                Collected::Stopped => return ReceiveOutcome::Stopped,
            }
        }
    }

    /// Whether `meta` could have come from a producer with our limits.
    ///
    /// Chunks are unindexed, so a chunk arriving in place of lost metadata
    /// would otherwise be parsed as a header and swallow later frames.
    fn plausible(&self, meta: &FrameMetadata) -> bool {
        let total = meta.total_size as usize;
        let chunks = meta.chunk_count as usize;
        if chunks == 0 {
            return total == 0;
        }
        total <= chunks * self.config.max_packet_size.max(MIN_PACKET_SIZE)
            && total > (chunks - 1) * MIN_PACKET_SIZE
    }

    async fn collect_chunks(&mut self, meta: FrameMetadata, cancel: &CancellationToken) -> Collected {
        let mut reassembly = Reassembly::new(meta);

        while !reassembly.is_complete() {
            let received = tokio::select! {
                r = tokio::time::timeout(self.config.chunk_timeout, self.socket.recv(&mut self.buf)) => r,
                _ = cancel.cancelled() => return Collected::Stopped,
            };

            match received {
                Ok(Ok(n)) => {
                    let chunk = &self.buf[..n];
                    if is_terminate(chunk) {
                        return Collected::Terminated;
                    }
                    reassembly.push(chunk);
                }
                Ok(Err(e)) => {
                    debug!("chunk receive error for frame #{}: {e}", meta.sequence);
                    break;
                }
                Err(_) => {
                    debug!(
                        "chunk timeout for frame #{} after {}/{} chunks",
                        meta.sequence,
                        reassembly.collected(),
                        meta.chunk_count
                    );
                    break;
                }
            }
        }

        Collected::Frame(reassembly)
    }

    fn deliver(&mut self, seq: u32, bytes: Bytes) {
        let gap = self.stats.record_received(seq, bytes.len());
        if gap > 0 {
            debug!("{gap} frame(s) missing before #{seq}");
        }
        trace!("received frame #{seq} ({} bytes)", bytes.len());

        match self.decoder.decode(&bytes) {
            Ok(mut frame) => {
                frame.sequence = seq;
                self.slot.publish(frame);
            }
            Err(e) => warn!("decoding frame #{seq} failed: {e}"),
        }
    }
}

fn is_closed(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe
    )
}

// ── Tests ────────────────────────────────────────────────────────
