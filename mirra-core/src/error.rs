//! Domain-specific error types for the Mirra frame transport.
//!
//! All fallible operations return `Result<T, MirraError>`. Frame-local
//! variants are absorbed by the receive loop and turned into counters;
//! only [`MirraError::Bind`] and [`MirraError::ConnectFailed`] reach the
//! caller of a running session.

use std::net::SocketAddr;

use thiserror::Error;

/// The canonical error type for the Mirra transport.
#[derive(Debug, Error)]
pub enum MirraError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A metadata datagram was shorter than the fixed record size.
    #[error("metadata too short: {len} bytes (need {need})")]
    MetadataTooShort { len: usize, need: usize },

    /// A session configuration reply could not be parsed.
    #[error("invalid session config: {0}")]
    InvalidSessionConfig(String),

    /// A state-machine transition or packet violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Frame Errors ─────────────────────────────────────────────
    /// Fewer chunks arrived than the metadata declared.
    #[error("incomplete frame: {received}/{expected} chunks")]
    IncompleteFrame { expected: u16, received: u16 },

    /// The reassembled length differs from the declared total size.
    #[error("size mismatch: declared {expected} bytes, reassembled {actual}")]
    SizeMismatch { expected: u32, actual: usize },

    /// The CRC-32 of the reassembled frame differs from the declared one.
    #[error("checksum mismatch: declared {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The frame needs more chunks than the metadata can declare.
    #[error("frame too large: {size} bytes (max {max} at current packet size)")]
    FrameTooLarge { size: usize, max: usize },

    /// The transport refused a datagram of this size.
    #[error("datagram of {size} bytes exceeds the transport limit")]
    DatagramTooLarge { size: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// Binding the session socket failed. Fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The UDP/IO layer reported an error.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake reply never arrived.
    #[error("no session config from peer after {attempts} attempts")]
    ConnectFailed { attempts: u32 },

    // ── Collaborator Errors ──────────────────────────────────────
    /// The capture/encode collaborator failed.
    #[error("capture error: {0}")]
    Capture(String),

    /// The decode collaborator rejected a validated frame.
    #[error("decode error: {0}")]
    Decode(String),

    /// A spawned session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl MirraError {
    /// Whether this error only affects the frame in flight.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            MirraError::MetadataTooShort { .. }
                | MirraError::IncompleteFrame { .. }
                | MirraError::SizeMismatch { .. }
                | MirraError::ChecksumMismatch { .. }
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for MirraError {
    fn from(s: String) -> Self {
        MirraError::Other(s)
    }
}

impl From<&str> for MirraError {
    fn from(s: &str) -> Self {
        MirraError::Other(s.to_string())
    }
}

impl From<tokio::task::JoinError> for MirraError {
    fn from(e: tokio::task::JoinError) -> Self {
        MirraError::Task(e.to_string())
    }
}
