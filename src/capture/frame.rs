use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, StreamError};

/// Bytes per pixel for every RGB-family colour mode (blue, green, red, padding)
pub const BYTES_PER_PIXEL: usize = 4;

/// RGB-family colour channel modes a sensor can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColourMode {
    #[default]
    Rgb640x480Fps30,
    Rgb1280x960Fps12,
}

impl ColourMode {
    pub const fn width(self) -> u32 {
        match self {
            Self::Rgb640x480Fps30 => 640,
            Self::Rgb1280x960Fps12 => 1280,
        }
    }

    pub const fn height(self) -> u32 {
        match self {
            Self::Rgb640x480Fps30 => 480,
            Self::Rgb1280x960Fps12 => 960,
        }
    }

    pub const fn fps(self) -> u32 {
        match self {
            Self::Rgb640x480Fps30 => 30,
            Self::Rgb1280x960Fps12 => 12,
        }
    }

    pub const fn bytes_per_pixel(self) -> usize {
        BYTES_PER_PIXEL
    }

    /// Byte length of one frame's pixel payload in this mode
    pub const fn frame_pixel_data_length(self) -> usize {
        self.width() as usize * self.height() as usize * BYTES_PER_PIXEL
    }

    pub fn frame_interval(self) -> Duration {
        Duration::from_secs(1) / self.fps()
    }

    /// Geometry a well-behaved sensor reports once this mode is enabled
    pub const fn geometry(self) -> StreamGeometry {
        StreamGeometry {
            mode: self,
            width: self.width(),
            height: self.height(),
            frame_pixel_data_length: self.frame_pixel_data_length(),
        }
    }
}

impl fmt::Display for ColourMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RGB {}x{} @ {} fps", self.width(), self.height(), self.fps())
    }
}

/// Geometry of an enabled colour channel, as reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    pub mode: ColourMode,
    pub width: u32,
    pub height: u32,
    pub frame_pixel_data_length: usize,
}

impl StreamGeometry {
    /// Row stride of a tightly packed frame
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Whether the byte length covers exactly `height` rows of `stride` bytes
    pub fn is_packed(&self) -> bool {
        self.stride() * self.height as usize == self.frame_pixel_data_length
    }
}

/// One captured colour image. Owned by the sensor side; consumers copy out of it.
#[derive(Clone)]
pub struct ColourFrame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub frame_number: u64,
    pub width: u32,
    pub height: u32,
    pub mode: ColourMode,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl ColourFrame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.meta.frame_number
    }

    pub fn pixel_data_length(&self) -> usize {
        self.data.len()
    }

    /// Copy the whole payload into `dst`, which must be exactly as long as the payload.
    /// On mismatch `dst` is left untouched.
    pub fn copy_pixel_data_to(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() != self.data.len() {
            return Err(StreamError::FrameLengthMismatch {
                expected: dst.len(),
                actual: self.data.len(),
            });
        }

        dst.copy_from_slice(&self.data);
        Ok(())
    }
}

impl fmt::Debug for ColourFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColourFrame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(len: usize) -> ColourFrame {
        let mode = ColourMode::Rgb640x480Fps30;
        ColourFrame::new(
            Bytes::from(vec![7u8; len]),
            FrameMetadata {
                frame_number: 1,
                width: mode.width(),
                height: mode.height(),
                mode,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn default_mode_is_vga_at_thirty() {
        let mode = ColourMode::default();
        assert_eq!(mode, ColourMode::Rgb640x480Fps30);
        assert_eq!(mode.frame_pixel_data_length(), 1_228_800);
        assert_eq!(mode.frame_interval(), Duration::from_secs(1) / 30);
    }

    #[test]
    fn geometry_is_packed() {
        for mode in [ColourMode::Rgb640x480Fps30, ColourMode::Rgb1280x960Fps12] {
            let geometry = mode.geometry();
            assert!(geometry.is_packed());
            assert_eq!(geometry.stride(), mode.width() as usize * 4);
        }
    }

    #[test]
    fn copy_out_requires_matching_length() {
        let frame = frame(16);
        let mut short = [0u8; 15];
        let err = frame.copy_pixel_data_to(&mut short).unwrap_err();
        assert!(matches!(
            err,
            StreamError::FrameLengthMismatch {
                expected: 15,
                actual: 16
            }
        ));
        assert_eq!(short, [0u8; 15]);

        let mut exact = [0u8; 16];
        frame.copy_pixel_data_to(&mut exact).unwrap();
        assert_eq!(exact, [7u8; 16]);
    }
}
