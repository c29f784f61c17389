//! Configuration for the streaming server.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mirra_core::stream::{INITIAL_PACKET_SIZE, MIN_PACKET_SIZE};
use mirra_core::{MirraError, ProducerConfig, Resolution, SessionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Stream parameters sent to every viewer.
    pub stream: StreamConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local interface to bind.
    pub bind_address: String,
    /// UDP port viewers handshake with.
    pub listen_port: u16,
}

/// Stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frame width after resizing. Common choices: 640x360, 800x600, 1024x768.
    pub width: u32,
    pub height: u32,
    /// Target frames per second (1-120).
    pub fps: u32,
    /// JPEG quality (1-100).
    pub quality: u8,
    /// Initial chunk payload size in bytes; shrinks automatically.
    pub max_packet_size: usize,
    /// Gap between chunk datagrams in microseconds.
    pub chunk_delay_us: u64,
    /// How long each frame iteration listens for a competing viewer.
    pub control_poll_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            listen_port: mirra_core::stream::DEFAULT_PORT,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            fps: 30,
            quality: 35,
            max_packet_size: 1400,
            chunk_delay_us: 500,
            control_poll_ms: 1,
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

impl ServerConfig {
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

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// The socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr, MirraError> {
        let ip: IpAddr = self.network.bind_address.parse().map_err(|_| {
            MirraError::Other(format!(
                "invalid bind address {:?}",
                self.network.bind_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.network.listen_port))
    }

    /// The session config every viewer receives, with out-of-range values
    /// clamped.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            resolution: Resolution::new(self.stream.width.max(1), self.stream.height.max(1)),
            fps: self.stream.fps.clamp(1, 120),
            quality: self.stream.quality.clamp(1, 100),
        }
    }

    /// Convert into the core producer settings.
    pub fn to_producer_config(&self) -> Result<ProducerConfig, MirraError> {
        Ok(ProducerConfig {
            bind_addr: self.bind_addr()?,
            session: self.session_config(),
            packet_size: self
                .stream
                .max_packet_size
                .clamp(MIN_PACKET_SIZE, INITIAL_PACKET_SIZE),
            chunk_delay: Duration::from_micros(self.stream.chunk_delay_us),
            control_poll: Duration::from_millis(self.stream.control_poll_ms.max(1)),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
