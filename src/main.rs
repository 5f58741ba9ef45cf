//! Colour stream viewer: depth-camera colour channel to an on-screen bitmap

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use colourskel::capture::{ColourSensor, SyntheticSensor, V4l2Sensor};
use colourskel::{utils, ColourSession, Config, SensorKind, AUTO_DEVICE};

#[derive(Debug, Parser)]
#[command(version, about = "Stream a depth camera's colour channel to a window")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// V4L2 capture node, or "auto"
    #[arg(short, long)]
    device: Option<String>,

    /// Use the built-in test pattern instead of a camera
    #[arg(long)]
    synthetic: bool,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames have been displayed
    #[arg(long)]
    frames: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("colourskel=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    info!("Colour stream launching...");

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.sensor.device = device;
    }
    if cli.synthetic {
        config.sensor.kind = SensorKind::Synthetic;
    }
    if cli.headless {
        config.display.enabled = false;
    }

    let sensor = open_sensor(&config)?;
    info!("Using colour sensor: {}", sensor.name());

    // Configuration failures end the run here: nothing is ever shown
    let mut session = ColourSession::start(sensor)?;
    let surface = session.surface();
    let geometry = session.geometry();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let limit = cli.frames;
    let session_handle = tokio::spawn(async move {
        let stats = session.run(shutdown_rx, limit).await;
        session.stop();
        stats
    });

    if config.display.enabled {
        run_window(&config, &surface, geometry.width, geometry.height)?;
        let _ = shutdown_tx.send(true);
    } else {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                let _ = shutdown_tx.send(true);
            }
            _ = shutdown_tx.closed() => {}
        }
    }

    let stats = session_handle.await?;
    info!(
        copied = stats.copied,
        dropped = stats.dropped,
        "Colour stream shutting down"
    );
    Ok(())
}

fn open_sensor(config: &Config) -> Result<Box<dyn ColourSensor>> {
    match config.sensor.kind {
        SensorKind::Synthetic => Ok(Box::new(SyntheticSensor::test_pattern())),
        SensorKind::V4l2 => {
            let mut sensor_config = config.sensor.clone();
            if sensor_config.device == AUTO_DEVICE {
                let found = utils::auto_detect_device()?;
                info!("Auto-detected {} ({})", found.path, found.card);
                sensor_config.device = found.path;
            }
            Ok(Box::new(V4l2Sensor::new(&sensor_config)))
        }
    }
}

#[cfg(feature = "sdl-display")]
fn run_window(
    config: &Config,
    surface: &colourskel::display::SurfaceReader,
    width: u32,
    height: u32,
) -> Result<()> {
    use color_eyre::eyre::eyre;
    use colourskel::display::Sdl2Display;

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut display = Sdl2Display::new(&sdl_context, &config.display, width, height)?;
    display.run(&sdl_context, surface)
}

#[cfg(not(feature = "sdl-display"))]
fn run_window(
    _config: &Config,
    _surface: &colourskel::display::SurfaceReader,
    _width: u32,
    _height: u32,
) -> Result<()> {
    tracing::warn!("Built without sdl-display; use --headless");
    Ok(())
}
