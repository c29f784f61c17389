//! Synthetic frame source.
//!
//! Renders a moving test pattern at the requested resolution and encodes
//! it as JPEG, standing in for a real screen grabber.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};

use mirra_core::{FrameSource, MirraError, Resolution};

/// Width of the sweeping bar in pixels.
const BAR_WIDTH: u32 = 24;

/// Moving gradient with a vertical bar sweeping left to right.
#[derive(Debug, Default)]
pub struct TestPattern {
    tick: u32,
    rgb: Vec<u8>,
}

impl TestPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far.
    pub fn ticks(&self) -> u32 {
        self.tick
    }

    fn render(&mut self, size: Resolution) {
        let (w, h) = (size.width, size.height);
        let t = self.tick;
        let bar_x = t.wrapping_mul(4) % w.max(1);

        self.rgb.clear();
        self.rgb.reserve(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                if x.wrapping_sub(bar_x) < BAR_WIDTH {
                    self.rgb.extend_from_slice(&[255, 255, 255]);
                } else {
                    self.rgb.extend_from_slice(&[
                        (x * 255 / w.max(1)) as u8,
                        (y * 255 / h.max(1)) as u8,
                        t.wrapping_mul(3) as u8,
                    ]);
                }
            }
        }
    }
}

impl FrameSource for TestPattern {
    fn capture_frame(
        &mut self,
        resize_to: Resolution,
        quality: u8,
    ) -> Result<Option<Vec<u8>>, MirraError> {
        if resize_to.width == 0 || resize_to.height == 0 {
            return Ok(None);
        }

        self.render(resize_to);
        self.tick = self.tick.wrapping_add(1);

        let img: RgbImage =
            ImageBuffer::from_raw(resize_to.width, resize_to.height, std::mem::take(&mut self.rgb))
                .ok_or_else(|| MirraError::Capture("invalid image dimensions".into()))?;

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
        let encoded = img.write_with_encoder(encoder);
        // Hand the pixel buffer back for the next frame.
        self.rgb = img.into_raw();
        encoded.map_err(|e| MirraError::Capture(format!("JPEG encode failed: {e}")))?;

        Ok(Some(jpeg))
    }
}

// ── Tests ────────────────────────────────────────────────────────
