//! Streaming service core logic.
//!
//! Binds the producer socket, plugs in the frame source and runs the
//! producer session until stopped.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use mirra_core::{FrameSource, MirraError, ProducerSession, StatsAccumulator};

use crate::capture::TestPattern;
use crate::config::ServerConfig;

// ── StreamService ────────────────────────────────────────────────

/// The top-level streaming service.
pub struct StreamService {
    config: ServerConfig,
    cancel: CancellationToken,
    stats: StatsAccumulator,
    report_interval: Duration,
}

impl StreamService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            stats: StatsAccumulator::new(),
            report_interval: Duration::from_secs(10),
        }
    }

    /// A handle that stops the service from another task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Counters of the most recent run.
    pub fn stats(&self) -> StatsAccumulator {
        self.stats.clone()
    }

    /// Run with the synthetic test pattern until stopped.
    pub async fn run(&mut self) -> Result<(), MirraError> {
        self.run_with(TestPattern::new()).await
    }

    /// Run with `source` until stopped. Fails only if the socket cannot
    /// be bound.
    pub async fn run_with<S: FrameSource + 'static>(&mut self, source: S) -> Result<(), MirraError> {
        let producer_config = self.config.to_producer_config()?;
        let session = ProducerSession::bind(producer_config, source)
            .await?
            .with_cancel_token(self.cancel.child_token());
        self.stats = session.stats();

        info!(
            "streaming {} on {}",
            producer_config.session,
            session.local_addr()?
        );

        let handle = session.start();
        let reporter = tokio::spawn(report_stats(
            self.stats.clone(),
            self.report_interval,
            self.cancel.clone(),
        ));

        let result = handle.wait().await;
        reporter.abort();
        info!("streaming service stopped");
        result
    }
}

/// Periodically log the producer counters.
async fn report_stats(stats: StatsAccumulator, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }
        let s = stats.snapshot();
        info!(
            "sent {} frames ({:.1} MiB), {} late",
            s.sent,
            s.bytes_sent as f64 / (1024.0 * 1024.0),
            s.late
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mirra_core::stream::handshake::HANDSHAKE_TOKEN;
    use tokio::net::UdpSocket;

    fn loopback_config() -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.network.bind_address = "127.0.0.1".into();
        cfg.network.listen_port = 0;
        cfg.stream.width = 160;
        cfg.stream.height = 120;
        cfg
    }

    #[test]
    fn service_creates_with_defaults() {
        let svc = StreamService::new(ServerConfig::default());
        let stop = svc.stop_handle();
        assert!(!stop.is_cancelled());
        assert_eq!(svc.stats().snapshot().sent, 0);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = loopback_config();
        cfg.network.listen_port = taken.local_addr().unwrap().port();

        let mut svc = StreamService::new(cfg);
        let err = svc.run().await.unwrap_err();
        assert!(matches!(err, MirraError::Bind { .. }));
    }

    #[tokio::test]
    async fn streams_jpeg_frames_until_stopped() {
        // Find a free port, then hand it to the service.
        let free = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = free.local_addr().unwrap().port();
        drop(free);
        let mut cfg = loopback_config();
        cfg.network.listen_port = port;

        let mut svc = StreamService::new(cfg);
        let stop = svc.stop_handle();
        let task = tokio::spawn(async move {
            let result = svc.run().await;
            (result, svc.stats().snapshot().sent)
        });

        let viewer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        viewer.connect(("127.0.0.1", port)).await.unwrap();
        let mut buf = [0u8; 2048];
        let config = loop {
            let _ = viewer.send(HANDSHAKE_TOKEN).await;
            if let Ok(Ok(n)) =
                tokio::time::timeout(Duration::from_millis(200), viewer.recv(&mut buf)).await
            {
                break buf[..n].to_vec();
            }
        };
        assert_eq!(config, b"160,120,30,35");

        // Skip config replies to any duplicate handshakes.
        let mut n = viewer.recv(&mut buf).await.unwrap();
        while n != 14 {
            n = viewer.recv(&mut buf).await.unwrap();
        }

        // Let a few frames complete before stopping.
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.cancel();
        let (result, sent) = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        result.unwrap();
        assert!(sent >= 1);
    }
}
