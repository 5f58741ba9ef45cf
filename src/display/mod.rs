pub mod surface;

#[cfg(feature = "sdl-display")]
pub mod display;

pub use surface::{
    BitmapPalette, BitmapSurface, Int32Rect, RenderTarget, SurfacePixelFormat, SurfaceReader,
};

#[cfg(feature = "sdl-display")]
pub use display::Sdl2Display;
