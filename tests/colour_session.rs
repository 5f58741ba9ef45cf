use std::time::Duration;

use colourskel::capture::{ColourMode, SyntheticSensor};
use colourskel::display::SurfacePixelFormat;
use colourskel::{ColourSession, StreamError};

const VGA_LEN: usize = 640 * 480 * 4;

fn start_manual() -> ColourSession<SyntheticSensor> {
    ColourSession::start(SyntheticSensor::new()).expect("session")
}

#[test]
fn session_surface_matches_sensor_geometry() {
    let session = start_manual();
    let geometry = session.geometry();
    let surface = session.surface();

    assert_eq!(geometry.mode, ColourMode::Rgb640x480Fps30);
    assert_eq!(geometry.frame_pixel_data_length, VGA_LEN);
    assert_eq!((surface.width(), surface.height()), (640, 480));
    assert_eq!(surface.format(), SurfacePixelFormat::Bgr32);
    assert_eq!(surface.stride(), 640 * 4);
    assert_eq!(surface.generation(), 0);
}

#[test]
fn frames_reach_the_surface_in_order() {
    let mut session = start_manual();
    let feed = session.sensor().feed().expect("feed");
    let surface = session.surface();

    for value in [10u8, 20, 30] {
        assert!(feed.push_fill(value));
        assert_eq!(session.pump(), 1);
        assert_eq!(surface.pixel(639, 479), Some([value; 4]));
    }

    let stats = session.stats();
    assert_eq!(stats.copied, 3);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.last_frame_number, Some(3));
    assert_eq!(surface.generation(), 3);
}

#[test]
fn malformed_frame_freezes_last_good_image() {
    let mut session = start_manual();
    let feed = session.sensor().feed().expect("feed");
    let surface = session.surface();

    let payload: Vec<u8> = (0..VGA_LEN).map(|i| (i % 256) as u8).collect();
    assert!(feed.push(payload.clone()));
    assert_eq!(session.pump(), 1);

    assert!(feed.push(vec![0u8; VGA_LEN - 1]));
    assert_eq!(session.pump(), 0);
    assert_eq!(surface.to_vec(), payload);
    assert_eq!(session.stats().dropped, 1);

    // the stream carries on with the next valid frame
    assert!(feed.push_fill(0));
    assert_eq!(session.pump(), 1);
    assert!(surface.to_vec().iter().all(|&b| b == 0));
}

#[test]
fn busy_consumer_drops_at_the_sensor() {
    let mut session = start_manual();
    let feed = session.sensor().feed().expect("feed");

    assert!(feed.push_fill(1));
    assert!(!feed.push_fill(2));
    assert_eq!(session.sensor().dropped_frames(), 1);

    assert_eq!(session.pump(), 1);
    assert_eq!(session.surface().pixel(0, 0), Some([1; 4]));
}

#[test]
fn unavailable_sensor_allocates_nothing() {
    let err = ColourSession::start(SyntheticSensor::refusing())
        .err()
        .expect("refused");
    assert!(matches!(err, StreamError::SensorUnavailable { .. }));
    assert!(err.to_string().contains("unavailable"));
}

#[test]
fn stop_closes_the_frame_source() {
    let mut session = start_manual();
    let feed = session.sensor().feed().expect("feed");
    session.stop();

    assert!(!session.sensor().is_colour_enabled());
    assert!(session.sensor().feed().is_none());
    // a lingering push handle can no longer reach the surface
    feed.push_fill(0xff);
    assert_eq!(session.pump(), 0);
    assert_eq!(session.surface().generation(), 0);
}

#[tokio::test]
async fn run_streams_test_pattern_until_limit() {
    let mut session = ColourSession::start(SyntheticSensor::test_pattern()).expect("session");
    let surface = session.surface();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let stats = tokio::time::timeout(Duration::from_secs(5), session.run(shutdown_rx, Some(3)))
        .await
        .expect("three frames within five seconds");

    assert_eq!(stats.copied, 3);
    assert_eq!(surface.generation(), 3);
    // leftmost bar of the pattern is never black
    let [b, g, r, _] = surface.pixel(0, 0).expect("pixel");
    assert!(b > 0 || g > 0 || r > 0);
    session.stop();
}

#[tokio::test]
async fn run_returns_on_shutdown() {
    let mut session = start_manual();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(async move {
        let stats = session.run(shutdown_rx, None).await;
        session.stop();
        stats
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(true).expect("session listening");

    let stats = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run returned")
        .expect("task joined");
    assert_eq!(stats.copied, 0);
}
