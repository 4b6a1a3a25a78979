//! Texture units: pre-rendered sprites for the object renderer.
//!
//! A texture model is an ordinary model document whose image reference
//! points at a raster. Each of its regions becomes one placeable unit: the
//! raster cropped to the region bounds, with a radial alpha falloff and
//! everything outside the region geometry cleared.

use std::path::Path;

use serde::{Deserialize, Serialize};
use slideforge_common::{Error, Result};
use slideforge_image::{argb, decode_png, Channels, ColorModel, PixelBuffer};
use slideforge_model::{read_model, Region};

/// One placeable object kind.
pub struct TextureUnit {
    pub sprite: PixelBuffer,
    /// Area of the source region, in its own pixel units.
    pub area: f64,
    /// Occurrence weight carried over from the source region.
    pub occurrences: u32,
    /// Collision footprint radius: `collisionable_radius * sqrt(area / pi)`.
    pub collision_radius: f64,
}

/// One placed object: a unit bound to its sphere and rotation. Lives for a
/// single region's rendering pass (and in the renderer checkpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureObject {
    pub unit: usize,
    pub sphere: usize,
    pub orientation: f64,
}

/// Linear ramp: 0 below `minimum`, 1 above `maximum`.
pub fn ratio(minimum: f64, maximum: f64, value: f64) -> f64 {
    if value < minimum {
        0.0
    } else if value > maximum {
        1.0
    } else {
        (value - minimum) / (maximum - minimum)
    }
}

/// Extract the units of one texture model document.
///
/// The referenced image must be a PNG next to the model document.
pub fn extract_texture_units(
    model_path: &Path,
    collisionable_radius: f64,
) -> Result<Vec<TextureUnit>> {
    let model = read_model(model_path)?;
    if model.image_relative_path.is_empty() {
        return Err(Error::format(format!(
            "texture model {} has no image reference",
            model_path.display()
        )));
    }
    let image_path = model_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&model.image_relative_path);
    let backing = decode_png(&std::fs::read(&image_path)?)?;

    let mut units = Vec::with_capacity(model.len());
    for region in model.regions() {
        units.push(extract_unit(&backing, region, collisionable_radius));
    }
    Ok(units)
}

fn extract_unit(backing: &PixelBuffer, region: &Region, collisionable_radius: f64) -> TextureUnit {
    let bounds = region.geometry.bounds();
    let left = bounds.min_x.floor().max(0.0) as u32;
    let top = bounds.min_y.floor().max(0.0) as u32;
    let right = (bounds.max_x.ceil() as u32).min(backing.width());
    let bottom = (bounds.max_y.ceil() as u32).min(backing.height());
    let width = right.saturating_sub(left).max(1);
    let height = bottom.saturating_sub(top).max(1);

    let center_x = left as f64 + width as f64 / 2.0;
    let center_y = top as f64 + height as f64 / 2.0;
    let limit = width.max(height) as f64 / 2.0;
    let opacity_limit = collisionable_radius * limit;

    let color = ColorModel::new(Channels::RGBA8);
    let mut sprite = PixelBuffer::new(width, height, Channels::RGBA8);
    for y in 0..height {
        for x in 0..width {
            let gx = left + x;
            let gy = top + y;
            if !region.geometry.contains(gx as f64 + 0.5, gy as f64 + 0.5) {
                continue;
            }
            let dx = gx as f64 + 0.5 - center_x;
            let dy = gy as f64 + 0.5 - center_y;
            let distance = (dx * dx + dy * dy).sqrt();
            let alpha = ((1.0 - ratio(opacity_limit, limit, distance)) * 255.0) as u32 & 0xFF;
            let pixel = backing.pixel_unchecked(gx, gy);
            sprite.set_pixel_unchecked(
                x,
                y,
                argb(color.red(pixel), color.green(pixel), color.blue(pixel), alpha),
            );
        }
    }

    let area = region.geometry.area();
    TextureUnit {
        sprite,
        area,
        occurrences: region.occurrences,
        collision_radius: collisionable_radius * (area / std::f64::consts::PI).sqrt(),
    }
}

/// Normalized occurrence proportions across units.
pub fn unit_proportions(units: &[TextureUnit]) -> Vec<f64> {
    let mut proportions: Vec<f64> = units.iter().map(|u| u.occurrences as f64).collect();
    let sum: f64 = proportions.iter().sum();
    if sum != 0.0 {
        for p in proportions.iter_mut() {
            *p /= sum;
        }
    }
    proportions
}
