//! Headless display. Counts rendered frames, reports a stats overlay
//! through the log and optionally mirrors the latest frame to disk.
//!
//! The render loop polls the frame slot once per tick; it is never woken
//! by frame arrival. Frames published between two ticks are skipped.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mirra_core::{DecodedFrame, FrameReader, MirraError, StatsAccumulator, StreamStats};

/// Quality used for snapshot files.
const SNAPSHOT_QUALITY: u8 = 90;

// ── HeadlessDisplay ──────────────────────────────────────────────

/// Renders decoded frames without a window.
#[derive(Debug)]
pub struct HeadlessDisplay {
    snapshot: Option<PathBuf>,
    last: Option<Arc<DecodedFrame>>,
    rendered: u64,
    window_rendered: u64,
    window_start: Instant,
}

impl HeadlessDisplay {
    pub fn new(snapshot: Option<PathBuf>) -> Self {
        Self {
            snapshot,
            last: None,
            rendered: 0,
            window_rendered: 0,
            window_start: Instant::now(),
        }
    }

    /// Frames rendered since creation.
    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn last_frame(&self) -> Option<&Arc<DecodedFrame>> {
        self.last.as_ref()
    }

    /// Show one frame.
    pub fn render(&mut self, frame: Arc<DecodedFrame>) -> Result<(), MirraError> {
        self.rendered += 1;
        self.window_rendered += 1;
        let result = match &self.snapshot {
            Some(path) => write_snapshot(&frame, path),
            None => Ok(()),
        };
        self.last = Some(frame);
        result
    }

    /// Overlay line for the interval since the previous call.
    pub fn overlay(&mut self, stats: &StreamStats) -> String {
        let elapsed = self.window_start.elapsed();
        let fps = if elapsed.is_zero() {
            0.0
        } else {
            self.window_rendered as f64 / elapsed.as_secs_f64()
        };
        self.window_rendered = 0;
        self.window_start = Instant::now();

        let size = self
            .last
            .as_ref()
            .map(|f| f.resolution.to_string())
            .unwrap_or_else(|| "-".into());
        format_overlay(fps, stats, &size)
    }
}

/// `fps 29.8 | 800x600 | recv 1200 | drop 3 (0.2%) | late 0`
pub fn format_overlay(fps: f64, stats: &StreamStats, size: &str) -> String {
    format!(
        "fps {fps:.1} | {size} | recv {} | drop {} ({:.1}%) | late {}",
        stats.received,
        stats.dropped,
        stats.loss_rate() * 100.0,
        stats.late
    )
}

/// Write `frame` as JPEG, replacing `path` atomically.
fn write_snapshot(frame: &DecodedFrame, path: &Path) -> Result<(), MirraError> {
    let size = frame.resolution;
    let img: RgbImage = ImageBuffer::from_raw(size.width, size.height, frame.pixels.to_vec())
        .ok_or_else(|| MirraError::Other(format!("frame buffer does not match {size}")))?;

    let tmp = path.with_extension("tmp");
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, SNAPSHOT_QUALITY))
            .map_err(|e| MirraError::Other(format!("snapshot encode failed: {e}")))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ── Render loop ──────────────────────────────────────────────────

/// Poll `reader` every `tick` and log the overlay every `report` until
/// `cancel` fires. Returns the display for final reporting.
pub async fn render_loop(
    mut reader: FrameReader,
    stats: StatsAccumulator,
    mut display: HeadlessDisplay,
    tick: Duration,
    report: Duration,
    cancel: CancellationToken,
) -> HeadlessDisplay {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut reporter = tokio::time::interval(report);
    reporter.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(frame) = reader.take_new() {
                    if let Err(e) = display.render(frame) {
                        warn!("render failed: {e}");
                    }
                }
            }
            _ = reporter.tick() => {
                let line = display.overlay(&stats.snapshot());
                info!("{}", line);
            }
            _ = cancel.cancelled() => break,
        }
    }
    display
}

// ── Tests ────────────────────────────────────────────────────────
