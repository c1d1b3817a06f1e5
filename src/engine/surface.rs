//! Pixel surface and drawing context.
//!
//! A [`Surface`] is the capture target for one job: an RGB buffer allocated
//! at the final viewport size, painted through a [`Painter`], then encoded
//! into the requested image format.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbImage};

use crate::error::{Error, Result};
use crate::params::{ImageFormat, MAX_DOCUMENT_HEIGHT, MAX_WIDTH};

// Largest surface any valid job can request (max width by clamped full-page
// height, three bytes per pixel).
const MAX_SURFACE_BYTES: u64 = MAX_WIDTH as u64 * MAX_DOCUMENT_HEIGHT as u64 * 3;

pub struct Surface {
    pixels: RgbImage,
}

impl Surface {
    /// Allocate a zeroed surface; fails instead of aborting on degenerate or
    /// oversized dimensions.
    pub fn allocate(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Engine("surface-allocation-failed"));
        }
        if width as u64 * height as u64 * 3 > MAX_SURFACE_BYTES {
            return Err(Error::Engine("surface-allocation-failed"));
        }
        Ok(Self {
            pixels: RgbImage::new(width, height),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Acquire the drawing context for this surface.
    pub fn painter(&mut self) -> Result<Painter<'_>> {
        if self.pixels.as_raw().is_empty() {
            return Err(Error::Engine("context-unavailable"));
        }
        Ok(Painter {
            pixels: &mut self.pixels,
        })
    }

    /// Encode the surface at the requested quality. Quality only affects
    /// JPEG output; PNG is lossless.
    pub fn encode(&self, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        let (width, height) = self.pixels.dimensions();
        let result = match format {
            ImageFormat::Png => PngEncoder::new(&mut out).write_image(
                self.pixels.as_raw(),
                width,
                height,
                ColorType::Rgb8,
            ),
            ImageFormat::Jpg | ImageFormat::Jpeg => JpegEncoder::new_with_quality(&mut out, quality)
                .write_image(self.pixels.as_raw(), width, height, ColorType::Rgb8),
        };
        result.map_err(|_| Error::Engine("encode-failed"))?;
        Ok(out.into_inner())
    }
}

/// Mutable drawing handle over a surface's pixels.
pub struct Painter<'a> {
    pixels: &'a mut RgbImage,
}

impl Painter<'_> {
    pub fn clear(&mut self, rgb: [u8; 3]) {
        for pixel in self.pixels.pixels_mut() {
            pixel.0 = rgb;
        }
    }

    /// Fill a rectangle, clipped to the surface bounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(width).min(self.pixels.width());
        let y_end = y.saturating_add(height).min(self.pixels.height());
        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                self.pixels.get_pixel_mut(px, py).0 = rgb;
            }
        }
    }

    /// One-pixel rectangle outline.
    pub fn frame_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3]) {
        if width == 0 || height == 0 {
            return;
        }
        self.fill_rect(x, y, width, 1, rgb);
        self.fill_rect(x, y.saturating_add(height.saturating_sub(1)), width, 1, rgb);
        self.fill_rect(x, y, 1, height, rgb);
        self.fill_rect(x.saturating_add(width.saturating_sub(1)), y, 1, height, rgb);
    }
}
