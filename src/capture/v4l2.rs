//! V4L2 colour channel with memory-mapped capture buffers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flume::Receiver;
use tracing::{debug, error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{ColourFrame, ColourMode, StreamGeometry};
use crate::capture::sensor::{ColourSensor, FrameDelivery, StreamWorker};
use crate::error::{Result, StreamError};
use crate::SensorConfig;

/// 32-bit BGRX, padding byte last
pub const BGR32_FOURCC: [u8; 4] = *b"XR24";
/// Older drivers advertise the same layout under this code
pub const BGR32_FOURCC_LEGACY: [u8; 4] = *b"BGR4";

struct Channel {
    delivery: FrameDelivery,
    frames: Receiver<ColourFrame>,
    worker: StreamWorker,
}

/// Colour channel of a camera exposed as a V4L2 capture node
pub struct V4l2Sensor {
    path: String,
    buffer_count: u32,
    channel: Option<Channel>,
}

impl V4l2Sensor {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            path: config.device.clone(),
            buffer_count: config.buffer_count.max(2),
            channel: None,
        }
    }

    fn open(&self) -> Result<Device> {
        let device = Device::with_path(&self.path)
            .map_err(|e| StreamError::unavailable(format!("cannot open {}: {e}", self.path)))?;

        let caps = device
            .query_caps()
            .map_err(|e| StreamError::unavailable(format!("cannot query {}: {e}", self.path)))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(StreamError::unavailable(format!(
                "{} doesn't support video capture",
                self.path
            )));
        }

        Ok(device)
    }

    /// Ask the driver for `mode` and report what it actually granted
    fn negotiate(&self, device: &Device, mode: ColourMode) -> Result<StreamGeometry> {
        let unsupported = |e: std::io::Error| StreamError::unavailable(format!("{mode}: {e}"));

        let mut fmt = device.format().map_err(unsupported)?;
        fmt.width = mode.width();
        fmt.height = mode.height();
        fmt.fourcc = FourCC::new(&BGR32_FOURCC);

        let mut granted = device.set_format(&fmt).map_err(unsupported)?;
        if granted.fourcc != fmt.fourcc {
            fmt.fourcc = FourCC::new(&BGR32_FOURCC_LEGACY);
            granted = device.set_format(&fmt).map_err(unsupported)?;
        }

        let is_bgr32 = granted.fourcc == FourCC::new(&BGR32_FOURCC)
            || granted.fourcc == FourCC::new(&BGR32_FOURCC_LEGACY);
        if !is_bgr32 || granted.width != mode.width() || granted.height != mode.height() {
            return Err(StreamError::unavailable(format!(
                "driver rewrote {mode} to {}x{} {}",
                granted.width, granted.height, granted.fourcc
            )));
        }

        let params = device
            .set_params(&Parameters::with_fps(mode.fps()))
            .map_err(unsupported)?;
        debug!(
            "Frame interval: {}/{}",
            params.interval.numerator, params.interval.denominator
        );

        Ok(StreamGeometry {
            mode,
            width: granted.width,
            height: granted.height,
            frame_pixel_data_length: granted.size as usize,
        })
    }
}

impl ColourSensor for V4l2Sensor {
    fn name(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self), fields(device = %self.path))]
    fn enable_colour(&mut self, mode: ColourMode) -> Result<StreamGeometry> {
        if let Some(channel) = &self.channel {
            let current = channel.delivery.geometry();
            if current.mode == mode {
                return Ok(current);
            }
            return Err(StreamError::unavailable(format!(
                "already streaming {}",
                current.mode
            )));
        }

        let device = self.open()?;
        let geometry = self.negotiate(&device, mode)?;
        let (delivery, frames) = FrameDelivery::channel(geometry);

        // The mmap stream is created on the worker thread; wait for it to come up
        let (ready_tx, ready_rx) = flume::bounded::<std::result::Result<(), String>>(1);
        let producer = delivery.clone();
        let buffer_count = self.buffer_count;
        let worker = StreamWorker::spawn("colour-v4l2", move |running| {
            capture_loop(device, buffer_count, producer, running, ready_tx)
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(StreamError::unavailable(reason)),
            Err(_) => return Err(StreamError::unavailable("capture worker exited early")),
        }

        info!(
            "Colour stream started: {} with {} buffers",
            mode, self.buffer_count
        );
        self.channel = Some(Channel {
            delivery,
            frames,
            worker,
        });
        Ok(geometry)
    }

    fn colour_geometry(&self) -> Option<StreamGeometry> {
        self.channel.as_ref().map(|channel| channel.delivery.geometry())
    }

    fn frames(&self) -> Option<Receiver<ColourFrame>> {
        self.channel.as_ref().map(|channel| channel.frames.clone())
    }

    fn disable_colour(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.delivery.close();
            channel.worker.stop();
            info!(
                dropped = channel.delivery.dropped(),
                "Colour stream stopped"
            );
        }
    }
}

impl Drop for V4l2Sensor {
    fn drop(&mut self) {
        self.disable_colour();
    }
}

fn capture_loop(
    device: Device,
    buffer_count: u32,
    delivery: FrameDelivery,
    running: Arc<AtomicBool>,
    ready: flume::Sender<std::result::Result<(), String>>,
) {
    let mut stream = match MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(format!("cannot map capture buffers: {e}")));
            return;
        }
    };

    while running.load(Ordering::Acquire) && !delivery.is_closed() {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                // Disconnection is not recovered from; the display keeps the last frame
                error!("Capture error: {}", e);
                break;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let device_timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);

        if used != delivery.geometry().frame_pixel_data_length {
            warn!(
                sequence = meta.sequence,
                used, "short capture buffer from driver"
            );
        }

        delivery.deliver(Bytes::copy_from_slice(&buf[..used]), Some(device_timestamp));
    }
}
