//! Handshake tokens and the negotiated session configuration.
//!
//! The consumer opens a session by sending the ASCII token `connect`;
//! the producer answers with the session configuration as
//! `"<width>,<height>,<fps>,<quality>"`. On explicit stop the producer
//! sends `TERMINATE` to the active peer, best effort.

use std::fmt;
use std::str::FromStr;

use crate::error::MirraError;

/// Literal token opening (or taking over) a session.
pub const HANDSHAKE_TOKEN: &[u8] = b"connect";

/// Literal token announcing a producer-side stop.
pub const TERMINATE_TOKEN: &[u8] = b"TERMINATE";

/// Receive bound for control datagrams.
pub const CONTROL_DATAGRAM_MAX: usize = 1024;

fn trimmed(datagram: &[u8]) -> &[u8] {
    let text = datagram.trim_ascii_end();
    text.strip_suffix(b"\0").unwrap_or(text)
}

/// Whether `datagram` is a handshake request.
pub fn is_handshake(datagram: &[u8]) -> bool {
    trimmed(datagram) == HANDSHAKE_TOKEN
}

/// Whether `datagram` is a termination notice.
pub fn is_terminate(datagram: &[u8]) -> bool {
    trimmed(datagram) == TERMINATE_TOKEN
}

// ── Resolution ───────────────────────────────────────────────────

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// Parameters the producer announces once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub resolution: Resolution,
    /// Target frames per second.
    pub fps: u32,
    /// Encoder quality (1..=100).
    pub quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(800, 600),
            fps: 30,
            quality: 30,
        }
    }
}

impl SessionConfig {
    /// Serialize to the ASCII reply datagram.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a reply datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, MirraError> {
        let text = std::str::from_utf8(trimmed(datagram))
            .map_err(|_| MirraError::InvalidSessionConfig("reply is not ASCII".into()))?;
        text.parse()
    }

    /// Time budget for one frame.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.resolution.width, self.resolution.height, self.fps, self.quality
        )
    }
}

impl FromStr for SessionConfig {
    type Err = MirraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        let [width, height, fps, quality] = fields.as_slice() else {
            return Err(MirraError::InvalidSessionConfig(format!(
                "expected 4 fields, got {}",
                fields.len()
            )));
        };

        fn field<T: FromStr>(name: &str, value: &str) -> Result<T, MirraError> {
            value
                .parse()
                .map_err(|_| MirraError::InvalidSessionConfig(format!("bad {name}: {value:?}")))
        }

        let config = Self {
            resolution: Resolution::new(field("width", width)?, field("height", height)?),
            fps: field("fps", fps)?,
            quality: field("quality", quality)?,
        };
        if config.fps == 0 {
            return Err(MirraError::InvalidSessionConfig("fps must be positive".into()));
        }
        if !(1..=100).contains(&config.quality) {
            return Err(MirraError::InvalidSessionConfig(format!(
                "quality {} outside 1..=100",
                config.quality
            )));
        }
        Ok(config)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens() {
        assert!(is_handshake(b"connect"));
        assert!(is_handshake(b"connect\n"));
        assert!(is_handshake(b"connect\0"));
        assert!(!is_handshake(b"connected"));
        assert!(!is_handshake(b"hello"));
        assert!(is_terminate(b"TERMINATE"));
        assert!(!is_terminate(b"terminate"));
    }

    #[test]
    fn session_config_wire_format() {
        let cfg = SessionConfig {
            resolution: Resolution::new(640, 360),
            fps: 30,
            quality: 35,
        };
        assert_eq!(cfg.encode(), b"640,360,30,35".to_vec());
        assert_eq!(SessionConfig::decode(b"640,360,30,35").unwrap(), cfg);
        assert_eq!(SessionConfig::decode(b" 640, 360 ,30,35\n").unwrap(), cfg);
    }

    #[test]
    fn session_config_rejects_garbage() {
        for bad in [&b""[..], b"1,2,3", b"1,2,3,4,5", b"a,2,3,4", b"800,600,0,30", b"800,600,30,300"] {
            assert!(SessionConfig::decode(bad).is_err(), "{bad:?}");
        }
        assert!(SessionConfig::decode(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn session_config_quality_range() {
        assert!(SessionConfig::decode(b"800,600,30,0").is_err());
        assert!(SessionConfig::decode(b"800,600,30,101").is_err());
        assert!(SessionConfig::decode(b"800,600,30,255").is_err());
        assert_eq!(SessionConfig::decode(b"800,600,30,1").unwrap().quality, 1);
        assert_eq!(SessionConfig::decode(b"800,600,30,100").unwrap().quality, 100);
    }

    #[test]
    fn frame_interval_from_fps() {
        let cfg = SessionConfig {
            fps: 50,
            ..Default::default()
        };
        assert_eq!(cfg.frame_interval().as_millis(), 20);
    }
}
