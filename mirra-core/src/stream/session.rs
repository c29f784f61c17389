//! Session orchestration for both ends of the stream.
//!
//! [`ProducerSession`] drives the wait-for-viewer → stream → hand-off cycle
//! on a single socket. [`ConsumerSession`] drives connect → receive →
//! reconnect. Both run until their cancellation token fires and can be
//! spawned with `start()`, which returns a [`SessionHandle`].

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::MirraError;
use crate::stream::connection::{ConnectionManager, ControlEvent, RetryPolicy, Session};
use crate::stream::handshake::SessionConfig;
use crate::stream::receiver::{FrameReceiver, ReceiveOutcome, ReceiverConfig};
use crate::stream::stats::StatsAccumulator;
use crate::stream::transmitter::{
    DEFAULT_CHUNK_DELAY, FrameTransmitter, INITIAL_PACKET_SIZE, PacketSizer, pace,
};
use crate::stream::types::{FrameDecoder, FrameReader, FrameSlot, FrameSource};

/// Well-known producer port.
pub const DEFAULT_PORT: u16 = 33060;

// ── SessionHandle ────────────────────────────────────────────────

/// A session running on the Tokio runtime.
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<(), MirraError>>,
}

impl SessionHandle {
    /// Ask the session to stop. Safe from any task or thread.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops this session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the session to finish and return its outcome.
    pub async fn wait(self) -> Result<(), MirraError> {
        self.join.await?
    }
}

// ── Producer ─────────────────────────────────────────────────────

/// Static producer settings, fixed for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerConfig {
    pub bind_addr: SocketAddr,
    /// Sent to every viewer on handshake.
    pub session: SessionConfig,
    /// Starting chunk size, clamped to `MIN_PACKET_SIZE..=INITIAL_PACKET_SIZE`.
    /// Shrinks on oversize failures.
    pub packet_size: usize,
    pub chunk_delay: Duration,
    /// How long each iteration waits for control traffic.
    pub control_poll: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            session: SessionConfig::default(),
            packet_size: INITIAL_PACKET_SIZE,
            chunk_delay: DEFAULT_CHUNK_DELAY,
            control_poll: Duration::from_millis(1),
        }
    }
}

/// How one streaming session ended.
enum StreamEnd {
    Stopped,
    Replaced(SocketAddr),
}

/// Serves captured frames to one viewer at a time.
pub struct ProducerSession<S> {
    manager: ConnectionManager,
    source: S,
    config: ProducerConfig,
    sizer: PacketSizer,
    stats: StatsAccumulator,
    cancel: CancellationToken,
}

impl<S: FrameSource> ProducerSession<S> {
    /// Bind the producer socket. A bind failure is returned here and the
    /// session never starts.
    pub async fn bind(config: ProducerConfig, source: S) -> Result<Self, MirraError> {
        let manager = ConnectionManager::bind(config.bind_addr).await?;
        Ok(Self {
            manager,
            source,
            sizer: PacketSizer::new(config.packet_size.min(INITIAL_PACKET_SIZE)),
            config,
            stats: StatsAccumulator::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MirraError> {
        self.manager.local_addr()
    }

    pub fn stats(&self) -> StatsAccumulator {
        self.stats.clone()
    }

    /// Stop when `token` is cancelled instead of an internal token.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Serve viewers until stopped.
    pub async fn run(mut self) -> Result<(), MirraError> {
        let cancel = self.cancel.clone();
        let mut handoff: Option<SocketAddr> = None;

        loop {
            let accepted = match handoff.take() {
                Some(peer) => self.manager.accept(peer, &self.config.session).await.map(Some),
                None => self.manager.listen(&self.config.session, &cancel).await,
            };
            let session = match accepted {
                Ok(Some(session)) => session,
                Ok(None) => break,
                Err(MirraError::ProtocolViolation(msg)) => {
                    return Err(MirraError::ProtocolViolation(msg));
                }
                Err(e) => {
                    warn!("could not set up session: {e}");
                    continue;
                }
            };

            match self.stream(&session, &cancel).await {
                StreamEnd::Stopped => {
                    self.manager.terminate(session.peer).await;
                    break;
                }
                StreamEnd::Replaced(peer) => {
                    info!(
                        "session with {} ended after {:.1}s",
                        session.peer,
                        session.established.elapsed().as_secs_f64()
                    );
                    handoff = Some(peer);
                }
            }
        }

        let s = self.stats.snapshot();
        info!("producer stopped: {} frames sent, {} late", s.sent, s.late);
        Ok(())
    }

    /// Spawn [`run`](Self::run) onto the runtime.
    pub fn start(self) -> SessionHandle
    where
        S: 'static,
    {
        let cancel = self.cancel.clone();
        SessionHandle {
            cancel,
            join: tokio::spawn(self.run()),
        }
    }

    async fn stream(&mut self, session: &Session, cancel: &CancellationToken) -> StreamEnd {
        let mut tx = FrameTransmitter::new(self.manager.socket(), session.peer, self.stats.clone())
            .with_sizer(self.sizer)
            .with_chunk_delay(self.config.chunk_delay);
        let interval = session.config.frame_interval();

        loop {
            let started = Instant::now();

            let event = tokio::select! {
                e = self.manager.poll_control(session, self.config.control_poll) => e,
                _ = cancel.cancelled() => return StreamEnd::Stopped,
            };
            match event {
                Ok(ControlEvent::PeerReplaced(peer)) => return StreamEnd::Replaced(peer),
                Ok(_) => {}
                Err(e) => debug!("control poll failed: {e}"),
            }

            let captured = self
                .source
                .capture_frame(session.config.resolution, session.config.quality);
            match captured {
                Ok(Some(frame)) if !frame.is_empty() => {
                    let sent = tokio::select! {
                        r = tx.send_frame(&frame) => r,
                        _ = cancel.cancelled() => return StreamEnd::Stopped,
                    };
                    if let Err(e) = sent {
                        debug!("frame abandoned: {e}");
                    }
                    self.sizer = tx.sizer();
                }
                Ok(_) => trace!("no frame captured this tick"),
                Err(e) => warn!("capture failed: {e}"),
            }

            let on_time = tokio::select! {
                on_time = pace(started, interval) => on_time,
                _ = cancel.cancelled() => return StreamEnd::Stopped,
            };
            if !on_time {
                self.stats.record_late();
            }
        }
    }
}

// ── Consumer ─────────────────────────────────────────────────────

/// Static consumer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub server: SocketAddr,
    /// Local address; port 0 picks an ephemeral one.
    pub bind_addr: SocketAddr,
    pub retry: RetryPolicy,
    pub receiver: ReceiverConfig,
}

impl ConsumerConfig {
    pub fn new(server: SocketAddr) -> Self {
        let bind_addr = if server.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0, 0, 0, 0], 0))
        };
        Self {
            server,
            bind_addr,
            retry: RetryPolicy::default(),
            receiver: ReceiverConfig::default(),
        }
    }
}

/// Receives frames from one producer, reconnecting when the stream dies.
pub struct ConsumerSession<D> {
    manager: ConnectionManager,
    receiver: FrameReceiver<D>,
    server: SocketAddr,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<D: FrameDecoder> ConsumerSession<D> {
    pub async fn bind(config: ConsumerConfig, decoder: D) -> Result<Self, MirraError> {
        let manager = ConnectionManager::bind(config.bind_addr).await?;
        let receiver = FrameReceiver::new(
            manager.socket(),
            decoder,
            FrameSlot::new(),
            StatsAccumulator::new(),
            config.receiver,
        );
        Ok(Self {
            manager,
            receiver,
            server: config.server,
            retry: config.retry,
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MirraError> {
        self.manager.local_addr()
    }

    /// The cell decoded frames are published into.
    pub fn slot(&self) -> FrameSlot {
        self.receiver.slot().clone()
    }

    pub fn reader(&self) -> FrameReader {
        self.receiver.slot().reader()
    }

    pub fn stats(&self) -> StatsAccumulator {
        self.receiver.stats().clone()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Connect and receive until stopped.
    ///
    /// Returns [`MirraError::ConnectFailed`] once a handshake exhausts its
    /// retry budget.
    pub async fn run(mut self) -> Result<(), MirraError> {
        let cancel = self.cancel.clone();

        loop {
            let Some(config) = self.manager.connect(self.server, &self.retry, &cancel).await?
            else {
                break;
            };
            debug!("streaming {config} from {}", self.server);
            self.receiver.begin_session();

            match self.receiver.receive_loop(&cancel).await {
                ReceiveOutcome::Stopped => break,
                ReceiveOutcome::PeerTerminated | ReceiveOutcome::Idle => {
                    info!("stream from {} ended; reconnecting", self.server);
                }
                ReceiveOutcome::Closed => {
                    self.manager.stop();
                    return Err(MirraError::Other("consumer socket closed".into()));
                }
            }
        }

        self.manager.stop();
        let s = self.receiver.stats().snapshot();
        info!(
            "consumer stopped: {} frames received, {} dropped ({:.1}% loss)",
            s.received,
            s.dropped,
            s.loss_rate() * 100.0
        );
        Ok(())
    }

    pub fn start(self) -> SessionHandle
    where
        D: 'static,
    {
        let cancel = self.cancel.clone();
        SessionHandle {
            cancel,
            join: tokio::spawn(self.run()),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
