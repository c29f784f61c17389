//! # mirra-core
//!
//! Protocol library for the Mirra frame-streaming transport.
//!
//! This crate contains:
//! - **Stream**: handshake, chunked frame transmission, validated
//!   reassembly and the producer/consumer session loops
//! - **State**: the `ConnectionPhase` session state machine
//! - **Error**: `MirraError`, a typed `thiserror`-based error hierarchy

pub mod error;
pub mod state;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::MirraError;
pub use state::ConnectionPhase;
pub use stream::{
    ConsumerConfig, ConsumerSession, DecodedFrame, FrameDecoder, FrameMetadata, FrameReader,
    FrameSlot, FrameSource, PassthroughDecoder, ProducerConfig, ProducerSession, Resolution,
    RetryPolicy, SessionConfig, SessionHandle, StatsAccumulator, StreamStats,
};
