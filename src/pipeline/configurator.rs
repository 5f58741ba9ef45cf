//! One-time colour channel setup and buffer allocation

use tracing::{info, instrument, warn};

use crate::capture::{ColourMode, ColourSensor, StreamGeometry};
use crate::display::{BitmapSurface, SurfacePixelFormat};
use crate::error::{Result, StreamError};

/// Standard desktop resolution for the display surface
pub const DEFAULT_DPI: f64 = 96.0;

/// The only mode the colour channel is brought up at
pub const COLOUR_MODE: ColourMode = ColourMode::Rgb640x480Fps30;

/// Fixed-length byte buffer holding the latest copied frame
pub struct PixelStagingBuffer {
    bytes: Box<[u8]>,
}

impl PixelStagingBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Everything the frame copier needs, sized from one sensor geometry
pub struct ColourBuffers {
    pub geometry: StreamGeometry,
    pub staging: PixelStagingBuffer,
    pub surface: BitmapSurface,
}

/// Enables the colour channel and allocates the staging buffer and display surface
///
/// Mode, DPI and pixel format are fixed: [`COLOUR_MODE`], [`DEFAULT_DPI`], BGR32.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamConfigurator;

impl StreamConfigurator {
    pub fn new() -> Self {
        Self
    }

    pub fn mode(&self) -> ColourMode {
        COLOUR_MODE
    }

    /// Bring the colour channel up and size both buffers from what the sensor reports.
    ///
    /// Fails with [`StreamError::SensorUnavailable`] when the sensor refuses the mode,
    /// is already streaming a different one, or reports a geometry the copier
    /// cannot handle. Nothing is allocated in that case.
    #[instrument(skip_all, fields(sensor = sensor.name(), mode = %COLOUR_MODE))]
    pub fn configure<S: ColourSensor + ?Sized>(&self, sensor: &mut S) -> Result<ColourBuffers> {
        if let Some(current) = sensor.colour_geometry() {
            if current.mode != COLOUR_MODE {
                return Err(StreamError::unavailable(format!(
                    "{} is already streaming {}",
                    sensor.name(),
                    current.mode
                )));
            }
        }

        let geometry = sensor.enable_colour(COLOUR_MODE)?;

        if !geometry.is_packed() || geometry.frame_pixel_data_length == 0 {
            warn!(?geometry, "sensor reported an unusable frame layout");
            sensor.disable_colour();
            return Err(StreamError::unavailable(format!(
                "{}x{} frame cannot span {} bytes",
                geometry.width, geometry.height, geometry.frame_pixel_data_length
            )));
        }

        let staging = PixelStagingBuffer::new(geometry.frame_pixel_data_length);
        let surface = BitmapSurface::new(
            geometry.width,
            geometry.height,
            DEFAULT_DPI,
            DEFAULT_DPI,
            SurfacePixelFormat::Bgr32,
            None,
        );

        info!(
            "Colour buffers ready: {}x{}, {} bytes per frame",
            geometry.width, geometry.height, geometry.frame_pixel_data_length
        );

        Ok(ColourBuffers {
            geometry,
            staging,
            surface,
        })
    }
}
