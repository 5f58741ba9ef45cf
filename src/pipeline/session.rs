//! Colour streaming session: sensor lifecycle plus frame delivery

use flume::Receiver;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capture::{ColourFrame, ColourSensor, StreamGeometry};
use crate::display::SurfaceReader;
use crate::error::{Result, StreamError};
use crate::pipeline::configurator::StreamConfigurator;
use crate::pipeline::copier::{CopyStats, FrameCopier};

/// An enabled colour channel wired to its frame copier.
///
/// The channel is disabled by [`ColourSession::stop`] or on drop, before the
/// staging buffer and surface are released.
pub struct ColourSession<S: ColourSensor> {
    sensor: S,
    geometry: StreamGeometry,
    frames: Receiver<ColourFrame>,
    copier: FrameCopier,
    reader: SurfaceReader,
    active: bool,
}

impl<S: ColourSensor> ColourSession<S> {
    /// Configure the colour channel on `sensor` and subscribe to its frames
    pub fn start(mut sensor: S) -> Result<Self> {
        let buffers = StreamConfigurator::new().configure(&mut sensor)?;

        let Some(frames) = sensor.frames() else {
            sensor.disable_colour();
            return Err(StreamError::unavailable(format!(
                "{} enabled colour without a frame source",
                sensor.name()
            )));
        };

        let geometry = buffers.geometry;
        let reader = buffers.surface.reader();
        info!("Colour session started on {}", sensor.name());

        Ok(Self {
            sensor,
            geometry,
            frames,
            copier: FrameCopier::from_buffers(buffers),
            reader,
            active: true,
        })
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    /// Handle for whatever paints the display surface
    pub fn surface(&self) -> SurfaceReader {
        self.reader.clone()
    }

    pub fn stats(&self) -> CopyStats {
        self.copier.stats()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Process every frame already waiting, without blocking.
    /// Returns how many reached the surface; always 0 once stopped.
    pub fn pump(&mut self) -> usize {
        if !self.active {
            return 0;
        }
        let mut shown = 0;
        while let Ok(frame) = self.frames.try_recv() {
            if self.copier.deliver(&frame) {
                shown += 1;
            }
        }
        shown
    }

    /// Deliver frames as they arrive until `shutdown` flips to `true`, the
    /// frame source closes, or `limit` frames have been displayed. Returns at
    /// once if the session was already stopped.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        limit: Option<u64>,
    ) -> CopyStats {
        let frames = self.frames.clone();

        loop {
            if !self.active || *shutdown.borrow() {
                break;
            }
            if limit.is_some_and(|limit| self.copier.stats().copied >= limit) {
                debug!("Frame limit reached");
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Shutdown requested");
                        break;
                    }
                }
                frame = frames.recv_async() => match frame {
                    Ok(frame) => {
                        self.copier.deliver(&frame);
                    }
                    Err(_) => {
                        warn!("Frame source closed");
                        break;
                    }
                },
            }
        }

        self.copier.stats()
    }

    /// Disable the colour channel. Safe to call more than once.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.sensor.disable_colour();
        self.active = false;

        let stats = self.copier.stats();
        info!(
            copied = stats.copied,
            dropped = stats.dropped,
            "Colour session stopped"
        );
    }
}

impl<S: ColourSensor> Drop for ColourSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticSensor;

    #[test]
    fn refusing_sensor_fails_to_start() {
        let err = ColourSession::start(SyntheticSensor::refusing())
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::SensorUnavailable { .. }));
    }

    #[test]
    fn pump_drains_pending_frames() {
        let mut session = ColourSession::start(SyntheticSensor::new()).unwrap();
        let feed = session.sensor().feed().unwrap();

        assert_eq!(session.pump(), 0);
        assert!(feed.push_fill(0x40));
        assert_eq!(session.pump(), 1);
        assert_eq!(session.surface().pixel(10, 10), Some([0x40; 4]));
    }

    #[test]
    fn stop_disables_sensor_once() {
        let mut session = ColourSession::start(SyntheticSensor::new()).unwrap();
        assert!(session.sensor().is_colour_enabled());

        session.stop();
        assert!(!session.is_active());
        assert!(!session.sensor().is_colour_enabled());
        session.stop();
    }

    #[test]
    fn frames_queued_before_stop_are_not_shown() {
        let mut session = ColourSession::start(SyntheticSensor::new()).unwrap();
        let feed = session.sensor().feed().unwrap();
        assert!(feed.push_fill(0x7f));

        session.stop();
        assert_eq!(session.pump(), 0);
        assert_eq!(session.surface().generation(), 0);
        assert_eq!(session.stats().copied, 0);
    }

    #[tokio::test]
    async fn run_after_stop_returns_immediately() {
        let mut session = ColourSession::start(SyntheticSensor::new()).unwrap();
        let feed = session.sensor().feed().unwrap();
        assert!(feed.push_fill(0x7f));
        session.stop();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = session.run(shutdown_rx, None).await;
        assert_eq!(stats.copied, 0);
        assert_eq!(session.surface().generation(), 0);
    }
}
