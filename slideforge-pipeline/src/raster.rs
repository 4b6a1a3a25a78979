//! Software compositing into pixel buffers.
//!
//! The render target is one tile translated by the negative tile origin;
//! everything here takes level-0 coordinates and an origin. Polygon fill is
//! a scanline pass honoring the winding rule; sprites are blitted through an
//! inverse rotation with src-over alpha compositing.

use slideforge_image::{argb, ColorModel, PixelBuffer};
use slideforge_model::{Ring, WindingRule};

/// One tile render target: the buffer plus the level-0 coordinates of its
/// top-left pixel.
pub struct RenderTarget<'a> {
    pub buffer: &'a mut PixelBuffer,
    pub origin_x: f64,
    pub origin_y: f64,
}

/// Src-over composite of `src` onto `dst` (8-bit channels).
pub fn composite_over(dst: u32, src: u32) -> u32 {
    let color = ColorModel::new(slideforge_image::Channels::RGBA8);
    let sa = color.alpha(src);
    if sa == 0xFF {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = color.alpha(dst);
    let inv = 0xFF - sa;
    let out_a = sa + da * inv / 0xFF;
    let blend = |s: u32, d: u32| (s * sa + d * da * inv / 0xFF) / out_a.max(1);
    argb(
        blend(color.red(src), color.red(dst)),
        blend(color.green(src), color.green(dst)),
        blend(color.blue(src), color.blue(dst)),
        out_a,
    )
}

/// Scanline-fill the flattened rings into the target.
pub fn fill_rings(target: &mut RenderTarget<'_>, rings: &[Ring], winding: WindingRule, color: u32) {
    let width = target.buffer.width();
    let height = target.buffer.height();
    let mut crossings: Vec<(f64, i32)> = Vec::new();

    for py in 0..height {
        let sample_y = target.origin_y + py as f64 + 0.5;
        crossings.clear();
        for ring in rings {
            let n = ring.len();
            for i in 0..n {
                let [x1, y1] = ring[i];
                let [x2, y2] = ring[(i + 1) % n];
                if (y1 <= sample_y) != (y2 <= sample_y) {
                    let t = (sample_y - y1) / (y2 - y1);
                    let x = x1 + t * (x2 - x1);
                    crossings.push((x, if y2 > y1 { 1 } else { -1 }));
                }
            }
        }
        if crossings.is_empty() {
            continue;
        }
        crossings.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        match winding {
            WindingRule::EvenOdd => {
                for pair in crossings.chunks_exact(2) {
                    fill_span(target, py, pair[0].0, pair[1].0, color, width);
                }
            }
            WindingRule::NonZero => {
                let mut winding_count = 0;
                let mut span_start = 0.0;
                for &(x, dir) in crossings.iter() {
                    if winding_count == 0 {
                        span_start = x;
                    }
                    winding_count += dir;
                    if winding_count == 0 {
                        fill_span(target, py, span_start, x, color, width);
                    }
                }
            }
        }
    }
}

fn fill_span(target: &mut RenderTarget<'_>, py: u32, x_start: f64, x_end: f64, color: u32, width: u32) {
    // A pixel is covered when its center lies inside the span.
    let first = (x_start - target.origin_x - 0.5).ceil().max(0.0) as i64;
    let last = (x_end - target.origin_x - 0.5).ceil().min(width as f64) as i64;
    for px in first..last {
        let px = px as u32;
        let dst = target.buffer.pixel_unchecked(px, py);
        target.buffer.set_pixel_unchecked(px, py, composite_over(dst, color));
    }
}

/// Blit a sprite rotated about its center, centered at (cx, cy) in level-0
/// coordinates.
pub fn blit_sprite(target: &mut RenderTarget<'_>, sprite: &PixelBuffer, cx: f64, cy: f64, rotation: f64) {
    let half_w = sprite.width() as f64 / 2.0;
    let half_h = sprite.height() as f64 / 2.0;
    let reach = (half_w * half_w + half_h * half_h).sqrt();

    let left = ((cx - reach - target.origin_x).floor().max(0.0)) as i64;
    let top = ((cy - reach - target.origin_y).floor().max(0.0)) as i64;
    let right = ((cx + reach - target.origin_x).ceil().min(target.buffer.width() as f64)) as i64;
    let bottom = ((cy + reach - target.origin_y).ceil().min(target.buffer.height() as f64)) as i64;
    if left >= right || top >= bottom {
        return;
    }

    let (sin, cos) = rotation.sin_cos();
    for py in top..bottom {
        for px in left..right {
            let dx = target.origin_x + px as f64 + 0.5 - cx;
            let dy = target.origin_y + py as f64 + 0.5 - cy;
            // Inverse rotation back into sprite space.
            let sx = dx * cos + dy * sin + half_w;
            let sy = -dx * sin + dy * cos + half_h;
            if sx < 0.0 || sy < 0.0 {
                continue;
            }
            let (sx, sy) = (sx as u32, sy as u32);
            if sx >= sprite.width() || sy >= sprite.height() {
                continue;
            }
            let src = sprite.pixel_unchecked(sx, sy);
            let dst = target.buffer.pixel_unchecked(px as u32, py as u32);
            target.buffer.set_pixel_unchecked(px as u32, py as u32, composite_over(dst, src));
        }
    }
}
