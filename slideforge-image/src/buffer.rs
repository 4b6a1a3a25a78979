//! Dense raster tiles.
//!
//! A `PixelBuffer` is the materialized form of one tile: a row-major `u32`
//! raster with a channel layout. It is also the render target the pipeline
//! composites into before encoding.

use std::io::Cursor;

use slideforge_common::{Error, Result};

use crate::channels::{argb, Channels, ColorModel};

#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: Channels,
    data: Vec<u32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, channels: Channels) -> Self {
        Self { width, height, channels, data: vec![0; (width as usize) * (height as usize)] }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<u32>()
    }

    pub fn fill(&mut self, value: u32) {
        self.data.fill(value);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Result<u32> {
        self.check_bounds(x, y)?;
        Ok(self.data[(y as usize) * (self.width as usize) + x as usize])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: u32) -> Result<()> {
        self.check_bounds(x, y)?;
        self.data[(y as usize) * (self.width as usize) + x as usize] = value;
        Ok(())
    }

    /// Unchecked variants for inner render loops that already clip.
    pub fn pixel_unchecked(&self, x: u32, y: u32) -> u32 {
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }

    pub fn set_pixel_unchecked(&mut self, x: u32, y: u32, value: u32) {
        self.data[(y as usize) * (self.width as usize) + x as usize] = value;
    }

    fn check_bounds(&self, x: u32, y: u32) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(Error::Bounds {
                x: x as i64,
                y: y as i64,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Encode a buffer as PNG bytes.
pub fn encode_png(buffer: &PixelBuffer) -> Result<Vec<u8>> {
    let color = ColorModel::new(buffer.channels());
    let mut rgba = image::RgbaImage::new(buffer.width(), buffer.height());
    for (x, y, out) in rgba.enumerate_pixels_mut() {
        let pixel = buffer.pixel_unchecked(x, y);
        *out = image::Rgba([
            color.red(pixel) as u8,
            color.green(pixel) as u8,
            color.blue(pixel) as u8,
            color.alpha(pixel) as u8,
        ]);
    }
    let mut bytes = Vec::new();
    rgba.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| Error::format(format!("PNG encode failed: {e}")))?;
    Ok(bytes)
}

/// Decode PNG bytes into an RGBA buffer.
pub fn decode_png(bytes: &[u8]) -> Result<PixelBuffer> {
    let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .map_err(|e| Error::format(format!("PNG decode failed: {e}")))?
        .to_rgba8();
    let mut buffer = PixelBuffer::new(decoded.width(), decoded.height(), Channels::RGBA8);
    for (x, y, pixel) in decoded.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        buffer.set_pixel_unchecked(x, y, argb(r as u32, g as u32, b as u32, a as u32));
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_round_trip() {
        let mut buffer = PixelBuffer::new(4, 3, Channels::RGBA8);
        buffer.set_pixel(3, 2, 0xFFAABBCC).unwrap();
        assert_eq!(buffer.pixel(3, 2).unwrap(), 0xFFAABBCC);
        assert_eq!(buffer.pixel(0, 0).unwrap(), 0);
    }

    #[test]
    fn test_out_of_bounds_is_error() {
        let buffer = PixelBuffer::new(4, 3, Channels::RGBA8);
        assert!(matches!(buffer.pixel(4, 0), Err(Error::Bounds { .. })));
        assert!(matches!(buffer.pixel(0, 3), Err(Error::Bounds { .. })));
    }

    #[test]
    fn test_png_round_trip() {
        let mut buffer = PixelBuffer::new(8, 8, Channels::RGBA8);
        for y in 0..8 {
            for x in 0..8 {
                buffer.set_pixel_unchecked(x, y, argb(x * 32, y * 32, 0x40, 0xFF));
            }
        }
        let bytes = encode_png(&buffer).unwrap();
        let back = decode_png(&bytes).unwrap();
        assert_eq!(back, buffer);
    }

    #[test]
    fn test_decode_garbage_is_format_error() {
        assert!(matches!(decode_png(b"not a png"), Err(Error::Format(_))));
    }
}
