//! # mirra-client: Frame Streaming Viewer
//!
//! Handshakes with `mirra-server`, receives and validates frames over
//! UDP, decodes them from JPEG and hands the freshest one to a headless
//! render loop that reports stream health through the log.

pub mod config;
pub mod decode;
pub mod display;
