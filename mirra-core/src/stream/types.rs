//! Collaborator seams and the single-slot frame hand-off.
//!
//! Capture/encode and decode are black boxes to the transport. They are
//! modelled as synchronous traits so the surrounding application can plug
//! in whatever codec it uses.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use crate::error::MirraError;
use crate::stream::handshake::Resolution;

// ── Collaborators ────────────────────────────────────────────────

/// Producer-side capture + encode collaborator.
pub trait FrameSource: Send {
    /// Capture one frame resized to `resize_to` and encode it at
    /// `quality`. `Ok(None)` means no frame is available this tick.
    fn capture_frame(
        &mut self,
        resize_to: Resolution,
        quality: u8,
    ) -> Result<Option<Vec<u8>>, MirraError>;
}

/// Consumer-side decode collaborator, called once per validated frame.
pub trait FrameDecoder: Send {
    fn decode(&mut self, encoded: &[u8]) -> Result<DecodedFrame, MirraError>;
}

/// Hands the validated bytes through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl FrameDecoder for PassthroughDecoder {
    fn decode(&mut self, encoded: &[u8]) -> Result<DecodedFrame, MirraError> {
        Ok(DecodedFrame {
            sequence: 0,
            resolution: Resolution::new(0, 0),
            pixels: Bytes::copy_from_slice(encoded),
        })
    }
}

// ── DecodedFrame ─────────────────────────────────────────────────

/// A frame ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Transport sequence number, filled in by the receiver.
    pub sequence: u32,
    /// Decoded dimensions (zero when the decoder does not know them).
    pub resolution: Resolution,
    /// Decoded pixel data, layout defined by the decoder.
    pub pixels: Bytes,
}

// ── FrameSlot ────────────────────────────────────────────────────

/// Single-slot cell holding the freshest decoded frame.
///
/// Publishing overwrites whatever is in the slot; nothing queues. A reader
/// that polls slower than frames arrive only ever sees the latest one.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    tx: Arc<watch::Sender<Option<Arc<DecodedFrame>>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the slot contents.
    pub fn publish(&self, frame: DecodedFrame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    /// A reader that starts with nothing unseen.
    pub fn reader(&self) -> FrameReader {
        FrameReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Current contents without marking anything as seen.
    pub fn peek(&self) -> Option<Arc<DecodedFrame>> {
        self.tx.borrow().clone()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Polling side of a [`FrameSlot`].
#[derive(Debug, Clone)]
pub struct FrameReader {
    rx: watch::Receiver<Option<Arc<DecodedFrame>>>,
}

impl FrameReader {
    /// The freshest frame if one was published since the last call.
    pub fn take_new(&mut self) -> Option<Arc<DecodedFrame>> {
        match self.rx.has_changed() {
            Ok(true) => self.rx.borrow_and_update().clone(),
            _ => None,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u32) -> DecodedFrame {
        DecodedFrame {
            sequence: seq,
            resolution: Resolution::new(1, 1),
            pixels: Bytes::from(vec![seq as u8]),
        }
    }

    #[test]
    fn reader_sees_only_the_freshest_frame() {
        let slot = FrameSlot::new();
        let mut reader = slot.reader();
        assert!(reader.take_new().is_none());

        for seq in 0..5 {
            slot.publish(frame(seq));
        }
        let seen = reader.take_new().unwrap();
        assert_eq!(seen.sequence, 4);
        assert!(reader.take_new().is_none());

        slot.publish(frame(5));
        assert_eq!(reader.take_new().unwrap().sequence, 5);
    }

    #[test]
    fn publish_without_readers_is_kept() {
        let slot = FrameSlot::new();
        slot.publish(frame(9));
        assert_eq!(slot.peek().unwrap().sequence, 9);
    }

    #[test]
    fn passthrough_keeps_bytes() {
        let decoded = PassthroughDecoder.decode(b"abc").unwrap();
        assert_eq!(&decoded.pixels[..], b"abc");
    }

    #[test]
    fn slow_reader_on_another_thread() {
        let slot = FrameSlot::new();
        let mut reader = slot.reader();
        let writer = slot.clone();
        std::thread::spawn(move || {
            for seq in 0..100 {
                writer.publish(frame(seq));
            }
        })
        .join()
        .unwrap();
        assert_eq!(reader.take_new().unwrap().sequence, 99);
    }
}
