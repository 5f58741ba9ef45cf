//! SDL2 Window Display Module
//! Presents a colour stream surface in an SDL2 window.
//! The surface is uploaded into one streaming texture whenever it changes.

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::Canvas;
use sdl2::video::Window;
use tracing::{error, info};

use crate::display::{SurfacePixelFormat, SurfaceReader};
use crate::DisplayConfig;

/// How long to idle when the surface has not changed
const IDLE_WAIT: Duration = Duration::from_millis(2);

/// SDL2 Window Display
/// Handles window creation, the event loop and surface presentation.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    snapshot_dir: PathBuf,
    snapshots: u32,
}

impl Sdl2Display {
    pub fn new(
        sdl_context: &sdl2::Sdl,
        config: &DisplayConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&config.title, width, height)
            .position_centered()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;

        Ok(Self {
            canvas,
            snapshot_dir: config.snapshot_dir.clone(),
            snapshots: 0,
        })
    }

    fn texture_format(format: SurfacePixelFormat) -> PixelFormatEnum {
        // SDL names packed formats by their 32-bit word, so little-endian byte
        // order for RGB888 is B, G, R, X
        match format {
            SurfacePixelFormat::Bgr32 => PixelFormatEnum::RGB888,
        }
    }

    fn save_snapshot(&mut self, surface: &SurfaceReader) {
        self.snapshots += 1;
        let path = self
            .snapshot_dir
            .join(format!("colour-snapshot-{:03}.png", self.snapshots));
        if let Err(e) = surface.save_png(&path) {
            error!("Snapshot failed: {}", e);
        }
    }

    /// Run until the window is closed or Escape is pressed
    pub fn run(&mut self, sdl_context: &sdl2::Sdl, surface: &SurfaceReader) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let texture_creator = self.canvas.texture_creator();
        let mut texture = texture_creator
            .create_texture_streaming(
                Self::texture_format(surface.format()),
                surface.width(),
                surface.height(),
            )
            .map_err(|e| eyre!(e))?;

        let mut shown = None;

        'running: loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        scancode: Some(Scancode::Escape),
                        ..
                    } => {
                        info!("Quit event received");
                        break 'running;
                    }
                    Event::KeyDown {
                        scancode: Some(Scancode::S),
                        repeat: false,
                        ..
                    } => self.save_snapshot(surface),
                    _ => {}
                }
            }

            let generation = surface.generation();
            if shown == Some(generation) {
                std::thread::sleep(IDLE_WAIT);
                continue;
            }

            surface
                .read(|pixels| texture.update(None, pixels, surface.stride()))
                .map_err(|e| eyre!(e))?;
            shown = Some(generation);

            self.canvas.clear();
            self.canvas
                .copy(&texture, None, None)
                .map_err(|e| eyre!(e))?;
            self.canvas.present();
        }

        Ok(())
    }
}
