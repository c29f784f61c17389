//! # mirra-server: Frame Streaming Server
//!
//! Waits for a viewer to handshake on a well-known UDP port, then captures,
//! JPEG-encodes and streams frames to it at the configured rate. A new
//! viewer handshaking mid-stream takes the stream over.
//!
//! Frames come from a synthetic test pattern; any [`mirra_core::FrameSource`]
//! can be plugged in through [`service::StreamService::run_with`].

pub mod capture;
pub mod config;
pub mod service;
