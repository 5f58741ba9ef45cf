//! In-process colour sensor for tests and hardware-free runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use flume::Receiver;
use tracing::{debug, info, instrument};

use crate::capture::frame::{ColourFrame, ColourMode, StreamGeometry, BYTES_PER_PIXEL};
use crate::capture::sensor::{ColourSensor, FrameDelivery, StreamWorker};
use crate::error::{Result, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Frames are pushed by hand through a [`SyntheticFeed`]
    Manual,
    /// A worker renders moving colour bars at the mode frame rate
    TestPattern,
    /// Every mode is rejected
    Refusing,
}

struct Channel {
    delivery: FrameDelivery,
    frames: Receiver<ColourFrame>,
    worker: Option<StreamWorker>,
}

pub struct SyntheticSensor {
    name: String,
    source: Source,
    channel: Option<Channel>,
}

impl SyntheticSensor {
    /// Sensor fed manually via [`SyntheticSensor::feed`]
    pub fn new() -> Self {
        Self::with_source("synthetic", Source::Manual)
    }

    /// Sensor that renders a test pattern on its own thread
    pub fn test_pattern() -> Self {
        Self::with_source("synthetic-pattern", Source::TestPattern)
    }

    /// Sensor that cannot enable any mode, like an unplugged camera
    pub fn refusing() -> Self {
        Self::with_source("synthetic-offline", Source::Refusing)
    }

    fn with_source(name: &str, source: Source) -> Self {
        Self {
            name: name.to_owned(),
            source,
            channel: None,
        }
    }

    /// Push handle for the enabled channel
    pub fn feed(&self) -> Option<SyntheticFeed> {
        self.channel.as_ref().map(|channel| SyntheticFeed {
            delivery: channel.delivery.clone(),
        })
    }

    pub fn is_colour_enabled(&self) -> bool {
        self.channel.is_some()
    }

    /// Frames the sensor discarded because the consumer was busy
    pub fn dropped_frames(&self) -> u64 {
        self.channel
            .as_ref()
            .map_or(0, |channel| channel.delivery.dropped())
    }
}

impl Default for SyntheticSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ColourSensor for SyntheticSensor {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(sensor = %self.name))]
    fn enable_colour(&mut self, mode: ColourMode) -> Result<StreamGeometry> {
        if self.source == Source::Refusing {
            return Err(StreamError::unavailable(format!(
                "{} cannot stream {mode}",
                self.name
            )));
        }

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

        let geometry = mode.geometry();
        let (delivery, frames) = FrameDelivery::channel(geometry);

        let worker = match self.source {
            Source::TestPattern => {
                let producer = delivery.clone();
                Some(StreamWorker::spawn("colour-pattern", move |running| {
                    run_pattern(producer, running)
                })?)
            }
            _ => None,
        };

        info!("Synthetic colour channel enabled: {}", mode);
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
            if let Some(worker) = channel.worker.as_mut() {
                worker.stop();
            }
            debug!(
                dropped = channel.delivery.dropped(),
                "Synthetic colour channel disabled"
            );
        }
    }
}

impl Drop for SyntheticSensor {
    fn drop(&mut self) {
        self.disable_colour();
    }
}

/// Push handle into a manually fed [`SyntheticSensor`]
#[derive(Clone)]
pub struct SyntheticFeed {
    delivery: FrameDelivery,
}

impl SyntheticFeed {
    pub fn geometry(&self) -> StreamGeometry {
        self.delivery.geometry()
    }

    /// Deliver an arbitrary payload. Returns `false` if it was not delivered.
    pub fn push(&self, payload: impl Into<Bytes>) -> bool {
        self.delivery.deliver(payload.into(), None)
    }

    /// Deliver a full-length frame with every byte set to `value`
    pub fn push_fill(&self, value: u8) -> bool {
        self.push(vec![value; self.geometry().frame_pixel_data_length])
    }
}

fn run_pattern(delivery: FrameDelivery, running: Arc<AtomicBool>) {
    let geometry = delivery.geometry();
    let interval = geometry.mode.frame_interval();
    let started = Instant::now();
    let mut tick = 0u32;

    while running.load(Ordering::Acquire) && !delivery.is_closed() {
        let next = started + interval * tick;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }

        let pixels = colour_bars(&geometry, tick);
        delivery.deliver(Bytes::from(pixels), Some(started.elapsed()));
        tick = tick.wrapping_add(1);
    }
}

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [0, 255, 255],
    [255, 255, 0],
    [0, 255, 0],
    [255, 0, 255],
    [0, 0, 255],
    [255, 0, 0],
    [0, 0, 0],
];

/// Eight vertical BGR bars scrolling one pixel per tick
pub fn colour_bars(geometry: &StreamGeometry, tick: u32) -> Vec<u8> {
    let width = geometry.width as usize;
    let mut pixels = vec![0u8; geometry.frame_pixel_data_length];
    let bar_width = (width / BARS.len()).max(1);

    for row in pixels.chunks_exact_mut(geometry.stride()) {
        for (x, px) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let shifted = (x + tick as usize) % width;
            let [b, g, r] = BARS[(shifted / bar_width).min(BARS.len() - 1)];
            px.copy_from_slice(&[b, g, r, 0]);
        }
    }

    pixels
}
