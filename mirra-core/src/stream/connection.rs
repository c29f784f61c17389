//! Handshake and peer hand-off over the session socket.
//!
//! The producer binds a fixed port and waits for the handshake token; the
//! first sender becomes the session peer and receives the session config.
//! While streaming, the producer keeps polling the same socket for
//! handshakes from a *different* address: one of those ends the current
//! session and hands the stream over to the newcomer.
//!
//! The consumer sends the token and waits for the config reply, retrying
//! a bounded number of times.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::MirraError;
use crate::state::ConnectionPhase;
use crate::stream::handshake::{
    CONTROL_DATAGRAM_MAX, HANDSHAKE_TOKEN, SessionConfig, TERMINATE_TOKEN, is_handshake,
};

// ── Session ──────────────────────────────────────────────────────

/// One connected peer, from handshake to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub peer: SocketAddr,
    pub config: SessionConfig,
    pub established: Instant,
}

/// What a control poll turned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Nothing relevant arrived.
    Quiet,
    /// The active peer handshook again and got the config re-sent.
    Rehandshake,
    /// A different peer handshook; the current session is over.
    PeerReplaced(SocketAddr),
}

/// Consumer-side handshake retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Wait per attempt for the config reply.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

// ── ConnectionManager ────────────────────────────────────────────

/// Owns the session socket's control plane and the [`ConnectionPhase`].
pub struct ConnectionManager {
    socket: Arc<UdpSocket>,
    phase: ConnectionPhase,
}

impl ConnectionManager {
    /// Bind the session socket. Failure is fatal for the session.
    pub async fn bind(addr: SocketAddr) -> Result<Self, MirraError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| MirraError::Bind { addr, source })?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already-bound socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            phase: ConnectionPhase::Idle,
        }
    }

    /// Shared handle to the session socket for the data plane.
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MirraError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn phase(&self) -> &ConnectionPhase {
        &self.phase
    }

    // ── Producer side ────────────────────────────────────────────

    /// Wait for a handshake and configure the sender as the new peer.
    ///
    /// Returns `Ok(None)` if `cancel` fires first.
    pub async fn listen(
        &mut self,
        config: &SessionConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<Session>, MirraError> {
        self.phase.begin_waiting()?;
        info!(
            "waiting for a viewer on {}",
            self.socket.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );

        let mut buf = [0u8; CONTROL_DATAGRAM_MAX];
        loop {
            let received = tokio::select! {
                r = self.socket.recv_from(&mut buf) => r,
                _ = cancel.cancelled() => {
                    self.phase.stop();
                    return Ok(None);
                }
            };

            match received {
                Ok((n, from)) if is_handshake(&buf[..n]) => {
                    return self.accept(from, config).await.map(Some);
                }
                Ok((n, from)) => trace!("ignoring {n}-byte datagram from {from} while idle"),
                // ICMP errors from a departed peer surface here on some platforms.
                Err(e) => debug!("recv while waiting for a viewer: {e}"),
            }
        }
    }

    /// Make `peer` the session peer and send it the session config.
    pub async fn accept(
        &mut self,
        peer: SocketAddr,
        config: &SessionConfig,
    ) -> Result<Session, MirraError> {
        match self.phase {
            ConnectionPhase::Idle => self.phase.begin_waiting()?,
            ConnectionPhase::AwaitingPeer => {}
            _ => self.phase.peer_lost()?,
        }
        self.phase.peer_found(peer)?;

        if let Err(e) = self.socket.send_to(&config.encode(), peer).await {
            self.phase.peer_lost()?;
            return Err(e.into());
        }
        self.phase.configured()?;
        info!("viewer {peer} connected, session config {config}");

        Ok(Session {
            peer,
            config: *config,
            established: Instant::now(),
        })
    }

    /// Check the socket for control traffic, waiting at most `wait`.
    pub async fn poll_control(
        &mut self,
        session: &Session,
        wait: Duration,
    ) -> Result<ControlEvent, MirraError> {
        let mut buf = [0u8; CONTROL_DATAGRAM_MAX];
        let received = match tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(ControlEvent::Quiet),
            Ok(r) => r,
        };

        let (n, from) = match received {
            Ok(pair) => pair,
            Err(e) => {
                debug!("control poll: {e}");
                return Ok(ControlEvent::Quiet);
            }
        };

        if !is_handshake(&buf[..n]) {
            trace!("ignoring {n}-byte datagram from {from}");
            return Ok(ControlEvent::Quiet);
        }

        if from == session.peer {
            debug!("viewer {from} handshook again; re-sending session config");
            self.socket.send_to(&session.config.encode(), from).await?;
            return Ok(ControlEvent::Rehandshake);
        }

        info!("viewer {from} is taking over from {}", session.peer);
        self.phase.peer_lost()?;
        Ok(ControlEvent::PeerReplaced(from))
    }

    /// Best-effort termination notice to `peer`, then back to idle.
    pub async fn terminate(&mut self, peer: SocketAddr) {
        if let Err(e) = self.socket.send_to(TERMINATE_TOKEN, peer).await {
            debug!("termination notice to {peer} failed: {e}");
        }
        self.phase.stop();
    }

    /// Back to idle without notifying anyone.
    pub fn stop(&mut self) {
        self.phase.stop();
    }

    // ── Consumer side ────────────────────────────────────────────

    /// Handshake with the producer at `server` and wait for its config.
    ///
    /// The socket is connected to `server`, so afterwards it only
    /// receives the producer's datagrams. The token is re-sent on every
    /// attempt. Returns `Ok(None)` if `cancel` fires first.
    pub async fn connect(
        &mut self,
        server: SocketAddr,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Option<SessionConfig>, MirraError> {
        if self.phase.peer().is_some() {
            self.phase.peer_lost()?;
        }
        self.phase.begin_waiting()?;
        self.socket.connect(server).await?;

        let mut buf = [0u8; CONTROL_DATAGRAM_MAX];
        for attempt in 1..=policy.attempts {
            debug!("handshake attempt {attempt}/{} to {server}", policy.attempts);
            if let Err(e) = self.socket.send(HANDSHAKE_TOKEN).await {
                debug!("handshake send failed: {e}");
            }

            let deadline = tokio::time::Instant::now() + policy.timeout;
            loop {
                let received = tokio::select! {
                    r = tokio::time::timeout_at(deadline, self.socket.recv(&mut buf)) => r,
                    _ = cancel.cancelled() => {
                        self.phase.stop();
                        return Ok(None);
                    }
                };

                match received {
                    Err(_) => break,
                    Ok(Ok(n)) => match SessionConfig::decode(&buf[..n]) {
                        Ok(config) => {
                            self.phase.peer_found(server)?;
                            self.phase.configured()?;
                            info!("connected to {server}, session config {config}");
                            return Ok(Some(config));
                        }
                        // Leftover frame data from an earlier session.
                        Err(_) => trace!("ignoring {n}-byte datagram during handshake"),
                    },
                    Ok(Err(e)) => {
                        // Usually "connection refused": nobody listens yet.
                        debug!("handshake recv: {e}");
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => break,
                            _ = cancel.cancelled() => {
                                self.phase.stop();
                                return Ok(None);
                            }
                        }
                    }
                }
            }
        }

        warn!("no session config from {server} after {} attempts", policy.attempts);
        self.phase.stop();
        Err(MirraError::ConnectFailed {
            attempts: policy.attempts,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::handshake::Resolution;

    fn config() -> SessionConfig {
        SessionConfig {
            resolution: Resolution::new(640, 360),
            fps: 30,
            quality: 35,
        }
    }

    async fn loopback() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    async fn producer() -> (ConnectionManager, SocketAddr) {
        let mgr = ConnectionManager::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = mgr.local_addr().unwrap();
        (mgr, addr)
    }

    async fn recv_text(sock: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), sock.recv_from(&mut buf))
            .await
            .expect("timeout")
            .unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let (_first, addr) = producer().await;
        let err = ConnectionManager::bind(addr).await.err().unwrap();
        assert!(matches!(err, MirraError::Bind { .. }));
    }

    #[tokio::test]
    async fn listen_accepts_first_handshake() {
        let (mut mgr, addr) = producer().await;
        let viewer = loopback().await;
        let cancel = CancellationToken::new();

        viewer.send_to(b"noise", addr).await.unwrap();
        viewer.send_to(HANDSHAKE_TOKEN, addr).await.unwrap();

        let session = mgr.listen(&config(), &cancel).await.unwrap().unwrap();
        assert_eq!(session.peer, viewer.local_addr().unwrap());
        assert!(mgr.phase().is_active());
        assert_eq!(recv_text(&viewer).await, b"640,360,30,35");
    }

    #[tokio::test]
    async fn listen_observes_cancellation() {
        let (mut mgr, _) = producer().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(mgr.listen(&config(), &cancel).await.unwrap().is_none());
        assert!(mgr.phase().is_idle());
    }

    #[tokio::test]
    async fn poll_control_detects_replacement() {
        let (mut mgr, addr) = producer().await;
        let a = loopback().await;
        let b = loopback().await;
        let cancel = CancellationToken::new();

        a.send_to(HANDSHAKE_TOKEN, addr).await.unwrap();
        let session = mgr.listen(&config(), &cancel).await.unwrap().unwrap();
        recv_text(&a).await;

        let wait = Duration::from_millis(20);
        assert_eq!(mgr.poll_control(&session, wait).await.unwrap(), ControlEvent::Quiet);

        a.send_to(HANDSHAKE_TOKEN, addr).await.unwrap();
        assert_eq!(
            mgr.poll_control(&session, Duration::from_secs(1)).await.unwrap(),
            ControlEvent::Rehandshake
        );
        assert_eq!(recv_text(&a).await, b"640,360,30,35");

        b.send_to(HANDSHAKE_TOKEN, addr).await.unwrap();
        let event = mgr.poll_control(&session, Duration::from_secs(1)).await.unwrap();
        let b_addr = b.local_addr().unwrap();
        assert_eq!(event, ControlEvent::PeerReplaced(b_addr));
        assert_eq!(mgr.phase(), &ConnectionPhase::AwaitingPeer);

        let next = mgr.accept(b_addr, &config()).await.unwrap();
        assert_eq!(next.peer, b_addr);
        assert_eq!(recv_text(&b).await, b"640,360,30,35");
    }

    #[tokio::test]
    async fn connect_receives_config() {
        let server = loopback().await;
        let server_addr = server.local_addr().unwrap();
        let mut client = ConnectionManager::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            assert!(is_handshake(&buf[..n]));
            server.send_to(b"1024,768,15,80", from).await.unwrap();
        });

        let policy = RetryPolicy {
            attempts: 3,
            timeout: Duration::from_secs(2),
        };
        let cfg = client
            .connect(server_addr, &policy, &cancel)
            .await
            .unwrap()
            .unwrap();
        responder.await.unwrap();

        assert_eq!(cfg.resolution, Resolution::new(1024, 768));
        assert_eq!(cfg.fps, 15);
        assert_eq!(cfg.quality, 80);
        assert!(client.phase().is_active());
    }

    #[tokio::test]
    async fn connect_gives_up_after_retry_budget() {
        let silent = loopback().await;
        let mut client = ConnectionManager::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let policy = RetryPolicy {
            attempts: 3,
            timeout: Duration::from_millis(50),
        };

        let err = client
            .connect(silent.local_addr().unwrap(), &policy, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MirraError::ConnectFailed { attempts: 3 }));
        assert!(client.phase().is_idle());

        // Every attempt re-sent the token.
        for _ in 0..3 {
            assert!(is_handshake(&recv_text(&silent).await));
        }
    }
}
