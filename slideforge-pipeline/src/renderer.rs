//! Region renderer dispatch.
//!
//! Renderers are keyed by region label with a flat-fill default. The
//! adjacent-objects renderer packs textured sprites with the constraint
//! solver during its pre-render pass, then stamps them per tile.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slideforge_common::{Error, Result};
use slideforge_image::argb;
use slideforge_model::Region;
use slideforge_solver::{pack_region, PackConfig, SphereSystem};

use crate::raster::{blit_sprite, fill_rings, RenderTarget};
use crate::semaphore::Semaphore;
use crate::sprite::{unit_proportions, TextureObject, TextureUnit};

/// Renderer behavior for one region class.
///
/// `before_render` runs once per region before any tile job touches it and
/// returns true when it changed checkpointable state. `render` must be pure
/// with respect to that state: tiles call it concurrently.
pub trait RegionRenderer: Send + Sync {
    fn before_render(&self, _region_id: usize, _region: &Region) -> Result<bool> {
        Ok(false)
    }

    fn render(&self, region_id: usize, region: &Region, target: &mut RenderTarget<'_>) -> Result<()>;

    /// Serialized checkpointable state, if the renderer has any.
    fn export_state(&self) -> Option<Vec<u8>> {
        None
    }

    /// Restore previously exported state.
    fn import_state(&self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Built-in label palette (ARGB), with a deterministic fallback for labels
/// outside the vocabulary.
pub fn label_color(label: &str) -> u32 {
    match label {
        "" => 0xFF000000,
        "fat" => 0xFFFFFF00,
        "stroma" => 0xFFFFAFAF,
        "loose stroma" => 0xFFFF00FF,
        "lobule" => 0xFF0000FF,
        "infiltration" => 0xFFFFC800,
        "disruption" => 0xFF00FFFF,
        "acinus" => 0xFF00FF00,
        "immune cell" => 0xFF404040,
        "epithelial cell" => 0xFFC0C0C0,
        "cancer" => 0xFFFF0000,
        "lumen" => 0xFFFFFFFF,
        other => {
            let mut hash: u32 = 0x811C_9DC5;
            for byte in other.bytes() {
                hash ^= byte as u32;
                hash = hash.wrapping_mul(0x0100_0193);
            }
            // Keep fallback colors light so structures stay visible.
            argb(
                0x60 + (hash & 0x7F),
                0x60 + ((hash >> 8) & 0x7F),
                0x60 + ((hash >> 16) & 0x7F),
                0xFF,
            )
        }
    }
}

/// Default renderer: flat fill by label color.
pub struct FlatFillRenderer {
    color: Option<u32>,
}

impl FlatFillRenderer {
    pub fn new() -> Self {
        Self { color: None }
    }

    pub fn with_color(color: u32) -> Self {
        Self { color: Some(color) }
    }
}

impl Default for FlatFillRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionRenderer for FlatFillRenderer {
    fn render(&self, _region_id: usize, region: &Region, target: &mut RenderTarget<'_>) -> Result<()> {
        let color = self.color.unwrap_or_else(|| label_color(&region.label));
        let rings = region.geometry.flatten(slideforge_model::geometry::FLATTEN_TOLERANCE);
        fill_rings(target, &rings, region.geometry.winding, color);
        Ok(())
    }
}

/// Placement state for one packed region.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct RegionPlacement {
    pub system: SphereSystem,
    pub objects: Vec<TextureObject>,
}

/// Packs sprite footprints into each region with the constraint solver,
/// then renders the placed objects with per-object rotation.
pub struct AdjacentObjectsRenderer {
    units: Vec<TextureUnit>,
    proportions: Vec<f64>,
    collisionable_radius: f64,
    pack_config: PackConfig,
    packing_gate: Arc<Semaphore>,
    seed: u64,
    placements: Mutex<HashMap<usize, RegionPlacement>>,
}

impl AdjacentObjectsRenderer {
    pub fn new(
        units: Vec<TextureUnit>,
        collisionable_radius: f64,
        pack_config: PackConfig,
        packing_gate: Arc<Semaphore>,
        seed: u64,
    ) -> Self {
        let proportions = unit_proportions(&units);
        Self {
            units,
            proportions,
            collisionable_radius,
            pack_config,
            packing_gate,
            seed,
            placements: Mutex::new(HashMap::new()),
        }
    }

    fn build_placement(&self, region_id: usize, region: &Region, rng: &mut StdRng) -> RegionPlacement {
        let bounds = region.geometry.bounds();
        let [center_x, center_y] = bounds.center();
        let max_r =
            (bounds.width() * bounds.width() + bounds.height() * bounds.height()).sqrt() / 2.0;
        let area = region.geometry.area();

        let mut system = SphereSystem::new();
        let mut objects = Vec::new();
        for (unit_id, unit) in self.units.iter().enumerate() {
            if unit.area <= 0.0 {
                continue;
            }
            let count = (self.proportions[unit_id] * area
                / (self.collisionable_radius * self.collisionable_radius * unit.area))
                as usize;
            for _ in 0..count {
                let r = max_r * rng.gen::<f64>().sqrt();
                let a = rng.gen::<f64>() * 2.0 * std::f64::consts::PI;
                let sphere = system.new_sphere(
                    center_x + r * a.cos(),
                    center_y + r * a.sin(),
                    0.0,
                    unit.collision_radius,
                    0,
                );
                objects.push(TextureObject {
                    unit: unit_id,
                    sphere,
                    orientation: 2.0 * std::f64::consts::PI * rng.gen::<f64>(),
                });
            }
        }

        tracing::debug!(
            region_id,
            label = %region.label,
            spheres = system.sphere_count(),
            "packing region objects"
        );
        pack_region(&mut system, &region.geometry, &self.pack_config, rng);

        // Objects whose solved center ended up outside the region are culled
        // here rather than at stamp time.
        let objects = objects
            .into_iter()
            .filter(|o| region.geometry.contains(system.x(o.sphere), system.y(o.sphere)))
            .collect();
        RegionPlacement { system, objects }
    }
}

impl RegionRenderer for AdjacentObjectsRenderer {
    fn before_render(&self, region_id: usize, region: &Region) -> Result<bool> {
        if self.placements.lock().contains_key(&region_id) {
            return Ok(false);
        }
        let _permit = self.packing_gate.acquire();
        let mut rng = StdRng::seed_from_u64(self.seed ^ (region_id as u64).wrapping_mul(0x9E37_79B9));
        let placement = self.build_placement(region_id, region, &mut rng);
        self.placements.lock().insert(region_id, placement);
        Ok(true)
    }

    fn render(&self, region_id: usize, region: &Region, target: &mut RenderTarget<'_>) -> Result<()> {
        if self.units.is_empty() {
            return FlatFillRenderer::new().render(region_id, region, target);
        }
        let placements = self.placements.lock();
        let placement = placements.get(&region_id).ok_or_else(|| {
            Error::capability(format!("region {region_id} rendered before its packing pass"))
        })?;
        for object in &placement.objects {
            let x = placement.system.x(object.sphere);
            let y = placement.system.y(object.sphere);
            blit_sprite(target, &self.units[object.unit].sprite, x, y, object.orientation);
        }
        Ok(())
    }

    fn export_state(&self) -> Option<Vec<u8>> {
        let placements = self.placements.lock();
        bincode::serialize(&*placements).ok()
    }

    fn import_state(&self, bytes: &[u8]) -> Result<()> {
        let restored: HashMap<usize, RegionPlacement> = bincode::deserialize(bytes)
            .map_err(|e| Error::format(format!("malformed renderer checkpoint: {e}")))?;
        *self.placements.lock() = restored;
        Ok(())
    }
}

/// Label-to-renderer mapping with a flat-fill default.
pub struct RendererRegistry {
    by_label: HashMap<String, Arc<dyn RegionRenderer>>,
    default: Arc<dyn RegionRenderer>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self { by_label: HashMap::new(), default: Arc::new(FlatFillRenderer::new()) }
    }

    pub fn set(&mut self, label: impl Into<String>, renderer: Arc<dyn RegionRenderer>) {
        self.by_label.insert(label.into(), renderer);
    }

    pub fn renderer(&self, label: &str) -> &Arc<dyn RegionRenderer> {
        self.by_label.get(label).unwrap_or(&self.default)
    }

    /// Labels with explicitly bound renderers (checkpoint granularity).
    pub fn bound_labels(&self) -> impl Iterator<Item = (&str, &Arc<dyn RegionRenderer>)> {
        self.by_label.iter().map(|(label, renderer)| (label.as_str(), renderer))
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}
