//! JPEG frame decoding.

use std::io::Cursor;

use bytes::Bytes;
use image::DynamicImage;
use image::codecs::jpeg::JpegDecoder;

use mirra_core::{DecodedFrame, FrameDecoder, MirraError, Resolution};

/// Decodes validated frames from JPEG into packed RGB8 pixels.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegFrameDecoder;

impl FrameDecoder for JpegFrameDecoder {
    fn decode(&mut self, encoded: &[u8]) -> Result<DecodedFrame, MirraError> {
        let decoder = JpegDecoder::new(Cursor::new(encoded))
            .map_err(|e| MirraError::Decode(format!("JPEG header: {e}")))?;
        let rgb = DynamicImage::from_decoder(decoder)
            .map_err(|e| MirraError::Decode(format!("JPEG body: {e}")))?
            .into_rgb8();

        Ok(DecodedFrame {
            sequence: 0,
            resolution: Resolution::new(rgb.width(), rgb.height()),
            pixels: Bytes::from(rgb.into_raw()),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
