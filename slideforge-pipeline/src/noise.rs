//! Quantization-noise dither.
//!
//! Synthetic fills produce large constant areas that band visibly once the
//! pyramid is subsampled. Each channel of each pixel is independently
//! reduced to a randomly chosen bit depth 0-3 bits below full, with the
//! dropped bits re-randomized.

use rand::Rng;
use slideforge_image::{argb, Channels, ColorModel, PixelBuffer};

pub fn add_quantization_noise(buffer: &mut PixelBuffer, rng: &mut impl Rng) {
    let color = ColorModel::new(Channels::RGBA8);
    for y in 0..buffer.height() {
        for x in 0..buffer.width() {
            let pixel = buffer.pixel_unchecked(x, y);
            let mut dither = |value: u32| {
                let q = rng.gen_range(0..4u32);
                let mask = (!0u32) << q;
                (value & mask) | rng.gen_range(0..(1u32 << q))
            };
            let red = dither(color.red(pixel));
            let green = dither(color.green(pixel));
            let blue = dither(color.blue(pixel));
            buffer.set_pixel_unchecked(x, y, argb(red, green, blue, color.alpha(pixel)));
        }
    }
}
