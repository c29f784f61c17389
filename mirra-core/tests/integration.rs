//! Integration tests: full producer/consumer sessions, viewer hand-off,
//! reconnection and shutdown over real UDP sockets on localhost.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mirra_core::stream::handshake::{HANDSHAKE_TOKEN, TERMINATE_TOKEN};
use mirra_core::{
    ConsumerConfig, ConsumerSession, FrameMetadata, FrameSource, MirraError, PassthroughDecoder,
    ProducerConfig, ProducerSession, Resolution, RetryPolicy, SessionConfig, StatsAccumulator,
};
use tokio::net::UdpSocket;
use tokio_test::{assert_err, assert_ok};

// ── Helpers ──────────────────────────────────────────────────────

/// Produces `width * height / 16`-byte frames stamped with a running counter.
struct Counter(u8);

impl FrameSource for Counter {
    fn capture_frame(&mut self, size: Resolution, _: u8) -> Result<Option<Vec<u8>>, MirraError> {
        self.0 = self.0.wrapping_add(1);
        let stamp = self.0;
        let len = (size.width as usize * size.height as usize / 16).max(1);
        Ok(Some((0..len).map(|i| stamp ^ (i as u8)).collect()))
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn producer_config(bind_addr: SocketAddr) -> ProducerConfig {
    ProducerConfig {
        bind_addr,
        session: SessionConfig {
            resolution: Resolution::new(400, 200),
            fps: 50,
            quality: 40,
        },
        ..Default::default()
    }
}

fn consumer_config(server: SocketAddr) -> ConsumerConfig {
    let mut config = ConsumerConfig::new(server);
    config.bind_addr = loopback();
    config.retry = RetryPolicy {
        attempts: 20,
        timeout: Duration::from_millis(200),
    };
    config.receiver.recv_timeout = Duration::from_millis(200);
    config
}

async fn wait_until(stats: &StatsAccumulator, done: impl Fn(u64) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(stats.snapshot().received) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timeout waiting for frames");
}

async fn recv(sock: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 2048];
    let n = tokio::time::timeout(Duration::from_secs(2), sock.recv(&mut buf))
        .await
        .expect("timeout")
        .unwrap();
    buf[..n].to_vec()
}

/// Read until the socket has been silent for `quiet`; returns the count.
async fn drain(sock: &UdpSocket, quiet: Duration) -> usize {
    let mut buf = [0u8; 2048];
    let mut count = 0;
    while let Ok(Ok(_)) = tokio::time::timeout(quiet, sock.recv(&mut buf)).await {
        count += 1;
    }
    count
}

// ── End to end ───────────────────────────────────────────────────

#[tokio::test]
async fn test_frames_flow_from_producer_to_consumer() {
    let producer = assert_ok!(ProducerSession::bind(producer_config(loopback()), Counter(0)).await);
    let addr = producer.local_addr().unwrap();
    let producer_stats = producer.stats();
    let producer = producer.start();

    let consumer = assert_ok!(ConsumerSession::bind(consumer_config(addr), PassthroughDecoder).await);
    let stats = consumer.stats();
    let mut reader = consumer.reader();
    let consumer = consumer.start();

    wait_until(&stats, |received| received >= 5).await;

    let frame = reader.take_new().expect("a frame was published");
    assert_eq!(frame.pixels.len(), 400 * 200 / 16);
    let stamp = frame.pixels[0];
    assert!(frame.pixels.iter().enumerate().all(|(i, b)| *b == stamp ^ (i as u8)));

    let s = stats.snapshot();
    assert_eq!(s.bytes_received, s.received * 5000);
    assert!(producer_stats.snapshot().sent >= s.received.saturating_sub(1));

    consumer.stop();
    assert_ok!(consumer.wait().await);
    producer.stop();
    assert_ok!(producer.wait().await);
}

// ── Hand-off ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_new_viewer_takes_over_stream() {
    let producer = assert_ok!(ProducerSession::bind(producer_config(loopback()), Counter(0)).await);
    let addr = producer.local_addr().unwrap();
    let producer = producer.start();

    let a = UdpSocket::bind(loopback()).await.unwrap();
    a.send_to(HANDSHAKE_TOKEN, addr).await.unwrap();
    assert_eq!(recv(&a).await, b"400,200,50,40");
    let meta = FrameMetadata::decode(&recv(&a).await).unwrap();
    assert_eq!(meta.sequence, 0);

    let b = UdpSocket::bind(loopback()).await.unwrap();
    b.send_to(HANDSHAKE_TOKEN, addr).await.unwrap();
    assert_eq!(recv(&b).await, b"400,200,50,40");

    // B gets a fresh session numbered from zero.
    let meta = FrameMetadata::decode(&recv(&b).await).unwrap();
    assert_eq!(meta.sequence, 0);

    // A's stream has stopped: once drained it stays silent.
    drain(&a, Duration::from_millis(150)).await;
    assert_eq!(drain(&a, Duration::from_millis(150)).await, 0);

    producer.stop();
    assert_ok!(producer.wait().await);
}

// ── Reconnection ─────────────────────────────────────────────────

#[tokio::test]
async fn test_consumer_reconnects_after_producer_restart() {
    let first = assert_ok!(ProducerSession::bind(producer_config(loopback()), Counter(0)).await);
    let addr = first.local_addr().unwrap();
    let first = first.start();

    let consumer = assert_ok!(ConsumerSession::bind(consumer_config(addr), PassthroughDecoder).await);
    let stats = consumer.stats();
    let consumer = consumer.start();
    wait_until(&stats, |received| received >= 3).await;

    // Stopping sends TERMINATE; the consumer goes back to handshaking.
    first.stop();
    assert_ok!(first.wait().await);
    let before = stats.snapshot().received;

    let second = assert_ok!(ProducerSession::bind(producer_config(addr), Counter(100)).await);
    let second = second.start();
    wait_until(&stats, |received| received >= before + 3).await;

    assert!(!consumer.is_finished());
    consumer.stop();
    assert_ok!(consumer.wait().await);
    second.stop();
    assert_ok!(second.wait().await);
}

#[tokio::test]
async fn test_viewer_sees_terminate_on_stop() {
    let producer = assert_ok!(ProducerSession::bind(producer_config(loopback()), Counter(0)).await);
    let addr = producer.local_addr().unwrap();
    let producer = producer.start();

    let viewer = UdpSocket::bind(loopback()).await.unwrap();
    viewer.send_to(HANDSHAKE_TOKEN, addr).await.unwrap();
    recv(&viewer).await;

    producer.stop();
    assert_ok!(producer.wait().await);

    let mut last = Vec::new();
    let mut buf = [0u8; 2048];
    while let Ok(Ok(n)) =
        tokio::time::timeout(Duration::from_millis(150), viewer.recv(&mut buf)).await
    {
        last = buf[..n].to_vec();
    }
    assert_eq!(last, TERMINATE_TOKEN);
}

// ── Shutdown and failure ─────────────────────────────────────────

#[tokio::test]
async fn test_stop_without_viewer_is_prompt() {
    let producer = assert_ok!(ProducerSession::bind(producer_config(loopback()), Counter(0)).await);
    let producer = producer.start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    producer.stop();
    assert_ok!(producer.wait().await);
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_consumer_without_producer_fails() {
    let silent = UdpSocket::bind(loopback()).await.unwrap();
    let mut config = consumer_config(silent.local_addr().unwrap());
    config.retry = RetryPolicy {
        attempts: 3,
        timeout: Duration::from_millis(20),
    };

    let consumer = assert_ok!(ConsumerSession::bind(config, PassthroughDecoder).await);
    let err = assert_err!(consumer.start().wait().await);
    assert!(matches!(err, MirraError::ConnectFailed { attempts: 3 }));
}

#[tokio::test]
async fn test_bind_failure_is_fatal() {
    let taken = UdpSocket::bind(loopback()).await.unwrap();
    let config = producer_config(taken.local_addr().unwrap());
    let result = ProducerSession::bind(config, Counter(0)).await;
    assert!(matches!(result, Err(MirraError::Bind { .. })));
}
