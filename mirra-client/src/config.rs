//! Viewer configuration.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mirra_core::stream::ReceiverConfig;
use mirra_core::{ConsumerConfig, MirraError, RetryPolicy};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Display settings.
    pub display: DisplayConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address as `host:port`.
    pub server_address: String,
    /// Wait per handshake attempt.
    pub handshake_timeout_ms: u64,
    /// Handshake attempts before giving up.
    pub handshake_retries: u32,
    /// Wait for the next frame before counting a timeout.
    pub receive_timeout_ms: u64,
    /// Wait for each chunk of a frame in progress.
    pub chunk_timeout_ms: u64,
    /// Reconnect after this many timeouts in a row; 0 never reconnects.
    pub idle_reconnect_after: u32,
}

/// Display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// How often the render loop checks for a new frame.
    pub tick_ms: u64,
    /// How often the overlay line is logged.
    pub stats_interval_ms: u64,
    /// Write each new frame to this path as JPEG. Empty disables it.
    pub snapshot_path: String,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: format!("127.0.0.1:{}", mirra_core::stream::DEFAULT_PORT),
            handshake_timeout_ms: 5000,
            handshake_retries: 10,
            receive_timeout_ms: 2000,
            chunk_timeout_ms: 500,
            idle_reconnect_after: 3,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            tick_ms: 16,
            stats_interval_ms: 1000,
            snapshot_path: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Resolve `server_address`, preferring IPv4.
    pub fn server_addr(&self) -> Result<SocketAddr, MirraError> {
        let addrs: Vec<SocketAddr> = self
            .network
            .server_address
            .to_socket_addrs()
            .map_err(|e| {
                MirraError::Other(format!(
                    "cannot resolve {:?}: {e}",
                    self.network.server_address
                ))
            })?
            .collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                MirraError::Other(format!(
                    "{:?} resolved to no addresses",
                    self.network.server_address
                ))
            })
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        (!self.display.snapshot_path.is_empty()).then(|| PathBuf::from(&self.display.snapshot_path))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.display.tick_ms.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.display.stats_interval_ms.max(100))
    }

    /// Convert into the core consumer settings.
    pub fn to_consumer_config(&self) -> Result<ConsumerConfig, MirraError> {
        let net = &self.network;
        let mut config = ConsumerConfig::new(self.server_addr()?);
        config.retry = RetryPolicy {
            attempts: net.handshake_retries.max(1),
            timeout: Duration::from_millis(net.handshake_timeout_ms.max(1)),
        };
        config.receiver = ReceiverConfig {
            recv_timeout: Duration::from_millis(net.receive_timeout_ms.max(1)),
            chunk_timeout: Duration::from_millis(net.chunk_timeout_ms.max(1)),
            idle_limit: (net.idle_reconnect_after > 0).then_some(net.idle_reconnect_after),
            ..ReceiverConfig::default()
        };
        Ok(config)
    }
}

// ── Tests ────────────────────────────────────────────────────────
