//! Sensor-side contract for the colour channel

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, Sender, TrySendError};
use tracing::{trace, warn};

use crate::capture::frame::{ColourFrame, ColourMode, FrameMetadata, StreamGeometry};
use crate::error::Result;

/// Frames in flight between a sensor and its consumer. One slot keeps
/// delivery strictly ordered with at most one frame pending.
pub const DELIVERY_CAPACITY: usize = 1;

/// A depth-camera handle whose colour channel can be switched on and off.
///
/// Acquiring the handle is the caller's business; implementations only
/// manage the colour stream on an already-open device.
pub trait ColourSensor: Send {
    fn name(&self) -> &str;

    /// Bring the colour channel up at `mode` and report the resulting geometry
    fn enable_colour(&mut self, mode: ColourMode) -> Result<StreamGeometry>;

    /// Geometry of the enabled channel, `None` while disabled
    fn colour_geometry(&self) -> Option<StreamGeometry>;

    /// Frame-arrival notifications for the enabled channel
    fn frames(&self) -> Option<Receiver<ColourFrame>>;

    /// Stop the colour channel. No frames are delivered afterwards.
    fn disable_colour(&mut self);
}

impl<S: ColourSensor + ?Sized> ColourSensor for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn enable_colour(&mut self, mode: ColourMode) -> Result<StreamGeometry> {
        (**self).enable_colour(mode)
    }

    fn colour_geometry(&self) -> Option<StreamGeometry> {
        (**self).colour_geometry()
    }

    fn frames(&self) -> Option<Receiver<ColourFrame>> {
        (**self).frames()
    }

    fn disable_colour(&mut self) {
        (**self).disable_colour()
    }
}

/// Producer half of a colour channel: stamps frame numbers and applies the
/// sensor-side drop policy when the consumer is still busy.
#[derive(Clone)]
pub struct FrameDelivery {
    tx: Sender<ColourFrame>,
    geometry: StreamGeometry,
    sequence: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    open: Arc<AtomicBool>,
}

impl FrameDelivery {
    pub fn channel(geometry: StreamGeometry) -> (Self, Receiver<ColourFrame>) {
        let (tx, rx) = flume::bounded(DELIVERY_CAPACITY);
        let delivery = Self {
            tx,
            geometry,
            sequence: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            open: Arc::new(AtomicBool::new(true)),
        };
        (delivery, rx)
    }

    pub fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    /// Hand a frame to the consumer. Returns `false` when the frame was not delivered.
    pub fn deliver(&self, data: Bytes, device_timestamp: Option<Duration>) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        let frame_number = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = ColourFrame::new(
            data,
            FrameMetadata {
                frame_number,
                width: self.geometry.width,
                height: self.geometry.height,
                mode: self.geometry.mode,
                device_timestamp,
            },
        );

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("colour_frames_sensor_dropped").increment(1);
                trace!(frame = frame.frame_number(), "consumer busy, frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Frames discarded because the previous one was still pending
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Refuse all further frames, from this handle and every clone of it
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::Acquire) || self.tx.is_disconnected()
    }
}

/// Background producer thread with a cooperative stop flag
pub(crate) struct StreamWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamWorker {
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || body(flag))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("colour worker panicked");
            }
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
