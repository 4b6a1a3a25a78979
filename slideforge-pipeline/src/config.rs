//! Renderer configuration documents.
//!
//! A JSON document binds region labels to renderer descriptions. Labels
//! without a binding (and bindings with an unrecognized kind, which are
//! logged) fall back to the default flat fill.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slideforge_common::{Error, Result};
use slideforge_solver::PackConfig;

use crate::renderer::{AdjacentObjectsRenderer, FlatFillRenderer, RendererRegistry};
use crate::semaphore::Semaphore;
use crate::sprite::extract_texture_units;

#[derive(Debug, Serialize, Deserialize)]
pub struct RendererConfigDoc {
    pub regions: Vec<RendererBinding>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RendererBinding {
    pub label: String,
    pub renderer: RendererKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RendererKind {
    Flat {
        #[serde(default)]
        color: Option<String>,
    },
    AdjacentObjects {
        #[serde(default = "default_collisionable_radius")]
        collisionable_radius: f64,
        /// Texture model documents, relative to the config file.
        textures: Vec<String>,
    },
    #[serde(other)]
    Unknown,
}

fn default_collisionable_radius() -> f64 {
    1.0
}

/// Parse a `#RRGGBB` color into an opaque ARGB pixel.
pub fn parse_color(color: &str) -> Result<u32> {
    let hex = color.strip_prefix('#').unwrap_or(color);
    if hex.len() != 6 {
        return Err(Error::format(format!("bad color {color:?}, expected #RRGGBB")));
    }
    let value = u32::from_str_radix(hex, 16)
        .map_err(|_| Error::format(format!("bad color {color:?}, expected #RRGGBB")))?;
    Ok(0xFF00_0000 | value)
}

pub fn load_renderer_config(path: &Path) -> Result<RendererConfigDoc> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::format(format!("malformed renderer config {}: {e}", path.display())))
}

/// Build the label-to-renderer registry from a config document. Texture
/// paths are resolved against `base_dir` (the config file's directory).
pub fn build_registry(
    doc: &RendererConfigDoc,
    base_dir: &Path,
    packing_gate: Arc<Semaphore>,
    pack_config: PackConfig,
    seed: u64,
) -> Result<RendererRegistry> {
    let mut registry = RendererRegistry::new();
    for binding in &doc.regions {
        match &binding.renderer {
            RendererKind::Flat { color } => {
                let renderer = match color {
                    Some(color) => FlatFillRenderer::with_color(parse_color(color)?),
                    None => FlatFillRenderer::new(),
                };
                registry.set(&binding.label, Arc::new(renderer));
            }
            RendererKind::AdjacentObjects { collisionable_radius, textures } => {
                let mut units = Vec::new();
                for texture in textures {
                    units.extend(extract_texture_units(
                        &base_dir.join(texture),
                        *collisionable_radius,
                    )?);
                }
                registry.set(
                    &binding.label,
                    Arc::new(AdjacentObjectsRenderer::new(
                        units,
                        *collisionable_radius,
                        pack_config.clone(),
                        packing_gate.clone(),
                        seed,
                    )),
                );
            }
            RendererKind::Unknown => {
                tracing::warn!(
                    label = %binding.label,
                    "unknown renderer kind; falling back to flat fill"
                );
            }
        }
    }
    Ok(registry)
}
