//! Display-owned bitmap surface written by the frame copier and read by the renderer

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, StreamError};

/// Output pixel formats of a [`BitmapSurface`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SurfacePixelFormat {
    /// Blue, green, red, unused padding byte
    #[default]
    Bgr32,
}

impl SurfacePixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// Integer rectangle in surface pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Int32Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Int32Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Colour table for indexed formats. Unused by the 32-bit formats.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitmapPalette {
    pub colours: Vec<[u8; 4]>,
}

/// A bitmap that accepts rectangular pixel writes
pub trait RenderTarget {
    fn pixel_width(&self) -> u32;

    fn pixel_height(&self) -> u32;

    fn format(&self) -> SurfacePixelFormat;

    /// Copy `rect` worth of pixels from `source`, whose rows are `stride` bytes
    /// apart and start `offset` bytes in.
    fn write_pixels(
        &mut self,
        rect: Int32Rect,
        source: &[u8],
        stride: usize,
        offset: usize,
    ) -> Result<()>;
}

struct SharedPixels {
    pixels: RwLock<Vec<u8>>,
    generation: AtomicU64,
}

/// Fixed-size bitmap; the pixel store is shared with any number of [`SurfaceReader`]s
pub struct BitmapSurface {
    width: u32,
    height: u32,
    dpi_x: f64,
    dpi_y: f64,
    format: SurfacePixelFormat,
    palette: Option<BitmapPalette>,
    shared: Arc<SharedPixels>,
}

impl BitmapSurface {
    pub fn new(
        width: u32,
        height: u32,
        dpi_x: f64,
        dpi_y: f64,
        format: SurfacePixelFormat,
        palette: Option<BitmapPalette>,
    ) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            dpi_x,
            dpi_y,
            format,
            palette,
            shared: Arc::new(SharedPixels {
                pixels: RwLock::new(vec![0; len]),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn dpi(&self) -> (f64, f64) {
        (self.dpi_x, self.dpi_y)
    }

    pub fn palette(&self) -> Option<&BitmapPalette> {
        self.palette.as_ref()
    }

    /// Bytes per surface row
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn reader(&self) -> SurfaceReader {
        SurfaceReader {
            width: self.width,
            height: self.height,
            format: self.format,
            shared: self.shared.clone(),
        }
    }

    fn check_write(
        &self,
        rect: Int32Rect,
        source: &[u8],
        stride: usize,
        offset: usize,
    ) -> Result<()> {
        if rect.x < 0 || rect.y < 0 || rect.is_empty() {
            return Err(StreamError::invalid_write(format!("bad rectangle {rect:?}")));
        }

        let (x, y) = (rect.x as u64, rect.y as u64);
        let (w, h) = (rect.width as u64, rect.height as u64);
        if x + w > self.width as u64 || y + h > self.height as u64 {
            return Err(StreamError::invalid_write(format!(
                "{rect:?} exceeds {}x{} surface",
                self.width, self.height
            )));
        }

        let row_bytes = rect.width as usize * self.format.bytes_per_pixel();
        if stride < row_bytes {
            return Err(StreamError::invalid_write(format!(
                "stride {stride} shorter than row of {row_bytes} bytes"
            )));
        }

        let needed = (rect.height as usize - 1)
            .checked_mul(stride)
            .and_then(|rows| rows.checked_add(row_bytes))
            .and_then(|span| span.checked_add(offset))
            .ok_or_else(|| {
                StreamError::invalid_write(format!(
                    "stride {stride} and offset {offset} overflow the source index"
                ))
            })?;
        if source.len() < needed {
            return Err(StreamError::invalid_write(format!(
                "source holds {} bytes, write needs {needed}",
                source.len()
            )));
        }

        Ok(())
    }
}

impl RenderTarget for BitmapSurface {
    fn pixel_width(&self) -> u32 {
        self.width
    }

    fn pixel_height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> SurfacePixelFormat {
        self.format
    }

    fn write_pixels(
        &mut self,
        rect: Int32Rect,
        source: &[u8],
        stride: usize,
        offset: usize,
    ) -> Result<()> {
        self.check_write(rect, source, stride, offset)?;

        let surface_stride = self.stride();
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = rect.width as usize * bpp;
        let full = rect.x == 0 && rect.y == 0 && rect.width as u32 == self.width;

        // Held for the whole update so readers never observe half a frame
        let mut pixels = self
            .shared
            .pixels
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if full && stride == surface_stride {
            let len = rect.height as usize * surface_stride;
            pixels[..len].copy_from_slice(&source[offset..offset + len]);
        } else {
            for row in 0..rect.height as usize {
                let src = offset + row * stride;
                let dst = (rect.y as usize + row) * surface_stride + rect.x as usize * bpp;
                pixels[dst..dst + row_bytes].copy_from_slice(&source[src..src + row_bytes]);
            }
        }

        self.shared.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }
}

/// Read side of a [`BitmapSurface`], handed to whatever paints it on screen
#[derive(Clone)]
pub struct SurfaceReader {
    width: u32,
    height: u32,
    format: SurfacePixelFormat,
    shared: Arc<SharedPixels>,
}

impl SurfaceReader {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> SurfacePixelFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Number of completed writes so far
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Run `f` against a consistent view of the pixels
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let pixels = self
            .shared
            .pixels
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&pixels)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read(|pixels| pixels.to_vec())
    }

    /// BGR pixel at (x, y), `None` outside the surface
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = y as usize * self.stride() + x as usize * self.format.bytes_per_pixel();
        self.read(|pixels| {
            let mut px = [0u8; 4];
            px.copy_from_slice(&pixels[at..at + 4]);
            Some(px)
        })
    }

    /// Write the current surface contents to `path` as an RGB PNG
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let rgb = self.read(|pixels| {
            pixels
                .chunks_exact(self.format.bytes_per_pixel())
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect::<Vec<u8>>()
        });

        image::save_buffer(
            path,
            &rgb,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )?;
        info!("Snapshot saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(width: u32, height: u32) -> BitmapSurface {
        BitmapSurface::new(width, height, 96.0, 96.0, SurfacePixelFormat::Bgr32, None)
    }

    #[test]
    fn new_surface_is_black() {
        let surface = surface(4, 3);
        let reader = surface.reader();
        assert_eq!(reader.to_vec(), vec![0u8; 4 * 3 * 4]);
        assert_eq!(reader.generation(), 0);
        assert_eq!(surface.dpi(), (96.0, 96.0));
        assert!(surface.palette().is_none());
    }

    #[test]
    fn full_write_replaces_every_pixel() {
        let mut surface = surface(4, 2);
        let source: Vec<u8> = (0..32).collect();
        surface
            .write_pixels(Int32Rect::new(0, 0, 4, 2), &source, 16, 0)
            .unwrap();

        let reader = surface.reader();
        assert_eq!(reader.to_vec(), source);
        assert_eq!(reader.generation(), 1);
        assert_eq!(reader.pixel(1, 1), Some([20, 21, 22, 23]));
        assert_eq!(reader.pixel(4, 0), None);
    }

    #[test]
    fn partial_write_honours_stride_and_offset() {
        let mut surface = surface(3, 3);
        // two rows of one pixel each, padded to 8 bytes, after a 2 byte header
        let source = [9, 9, 1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8];
        surface
            .write_pixels(Int32Rect::new(1, 1, 1, 2), &source, 8, 2)
            .unwrap();

        let reader = surface.reader();
        assert_eq!(reader.pixel(1, 1), Some([1, 2, 3, 4]));
        assert_eq!(reader.pixel(1, 2), Some([5, 6, 7, 8]));
        assert_eq!(reader.pixel(0, 1), Some([0, 0, 0, 0]));
        assert_eq!(reader.pixel(2, 2), Some([0, 0, 0, 0]));
    }

    #[test]
    fn rejected_writes_leave_surface_untouched() {
        let mut surface = surface(2, 2);
        let source = vec![1u8; 16];

        let cases = [
            (Int32Rect::new(0, 0, 3, 2), 16, 0),
            (Int32Rect::new(-1, 0, 1, 1), 8, 0),
            (Int32Rect::new(0, 0, 0, 2), 8, 0),
            (Int32Rect::new(0, 0, 2, 2), 4, 0),
            (Int32Rect::new(0, 0, 2, 2), 8, 1),
            (Int32Rect::new(0, 0, 1, 2), usize::MAX, 0),
            (Int32Rect::new(0, 0, 1, 1), 8, usize::MAX),
            (Int32Rect::new(0, 0, 2, 2), 8, usize::MAX - 8),
        ];
        for (rect, stride, offset) in cases {
            let err = surface
                .write_pixels(rect, &source, stride, offset)
                .unwrap_err();
            assert!(matches!(err, StreamError::InvalidSurfaceWrite { .. }));
        }

        let reader = surface.reader();
        assert_eq!(reader.generation(), 0);
        assert_eq!(reader.to_vec(), vec![0u8; 16]);
    }

    #[test]
    fn readers_never_see_a_half_written_frame() {
        let mut surface = surface(64, 48);
        let reader = surface.reader();
        let len = surface.stride() * 48;
        let rect = Int32Rect::new(0, 0, 64, 48);

        let writer = std::thread::spawn(move || {
            let frames = [vec![0x00u8; len], vec![0xffu8; len]];
            for i in 0..200 {
                surface
                    .write_pixels(rect, &frames[i % 2], 64 * 4, 0)
                    .unwrap();
            }
        });

        let mut views = 0;
        while !writer.is_finished() || views == 0 {
            reader.read(|pixels| {
                let first = pixels[0];
                assert!(pixels.iter().all(|&b| b == first), "torn frame observed");
            });
            views += 1;
        }
        writer.join().unwrap();
        assert_eq!(reader.generation(), 200);
    }

    #[test]
    fn snapshot_writes_rgb_png() {
        let mut surface = surface(2, 1);
        // blue pixel then red pixel, BGR order
        let source = [255, 0, 0, 0, 0, 0, 255, 0];
        surface
            .write_pixels(Int32Rect::new(0, 0, 2, 1), &source, 8, 0)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.png");
        surface.reader().save_png(&path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(decoded.get_pixel(1, 0).0, [255, 0, 0]);
    }
}
