//! Per-frame transfer from sensor memory into the display surface

use std::time::Instant;

use tracing::{error, instrument, trace, warn};

use crate::capture::frame::BYTES_PER_PIXEL;
use crate::capture::ColourFrame;
use crate::display::{BitmapSurface, Int32Rect, RenderTarget};
use crate::error::Result;
use crate::pipeline::configurator::{ColourBuffers, PixelStagingBuffer};

/// Running totals for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub copied: u64,
    pub dropped: u64,
    pub last_frame_number: Option<u64>,
}

/// Copies each arriving frame into the staging buffer, then blits it onto the surface
pub struct FrameCopier<T: RenderTarget = BitmapSurface> {
    staging: PixelStagingBuffer,
    target: T,
    stats: CopyStats,
}

impl FrameCopier<BitmapSurface> {
    pub fn from_buffers(buffers: ColourBuffers) -> Self {
        Self::new(buffers.staging, buffers.surface)
    }
}

impl<T: RenderTarget> FrameCopier<T> {
    pub fn new(staging: PixelStagingBuffer, target: T) -> Self {
        Self {
            staging,
            target,
            stats: CopyStats::default(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn staging(&self) -> &PixelStagingBuffer {
        &self.staging
    }

    pub fn stats(&self) -> CopyStats {
        self.stats
    }

    /// Transfer one frame. A length mismatch is reported before any byte moves,
    /// so both the staging buffer and the surface keep the previous frame.
    #[instrument(level = "trace", skip_all, fields(frame = frame.frame_number()))]
    pub fn on_frame(&mut self, frame: &ColourFrame) -> Result<()> {
        let started = Instant::now();

        frame.copy_pixel_data_to(self.staging.as_mut_slice())?;

        let width = self.target.pixel_width();
        let height = self.target.pixel_height();
        self.target.write_pixels(
            Int32Rect::new(0, 0, width as i32, height as i32),
            self.staging.as_slice(),
            width as usize * BYTES_PER_PIXEL,
            0,
        )?;

        self.stats.copied += 1;
        self.stats.last_frame_number = Some(frame.frame_number());
        metrics::counter!("colour_frames_copied").increment(1);
        metrics::histogram!("colour_copy_time_us").record(started.elapsed().as_micros() as f64);
        Ok(())
    }

    /// Callback boundary: errors stop here, the stream keeps going.
    /// Returns whether the frame reached the surface.
    pub fn deliver(&mut self, frame: &ColourFrame) -> bool {
        match self.on_frame(frame) {
            Ok(()) => {
                trace!(
                    frame = frame.frame_number(),
                    latency_us = frame.timestamp.elapsed().as_micros() as u64,
                    "frame displayed"
                );
                true
            }
            Err(e) => {
                self.stats.dropped += 1;
                metrics::counter!("colour_frames_dropped").increment(1);
                if e.is_frame_local() {
                    warn!(frame = frame.frame_number(), "Dropping frame: {}", e);
                } else {
                    error!(frame = frame.frame_number(), "Surface write failed: {}", e);
                }
                false
            }
        }
    }
}
