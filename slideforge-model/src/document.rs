//! Model document serialization.
//!
//! The on-disk model is a JSON document: model-level attributes plus an
//! ordered region list, each region carrying a numeric id, an optional
//! parent id, a label, a winding rule, an occurrence weight and its path
//! commands. Parse -> serialize -> parse reproduces equivalent geometry.

use std::path::Path;

use serde::{Deserialize, Serialize};
use slideforge_common::{Error, Result};

use crate::geometry::{RegionGeometry, WindingRule};
use crate::path::PathCommand;
use crate::region::{Model, Region};

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(default)]
    pub image_relative_path: String,
    #[serde(default)]
    pub new_region_label: String,
    pub regions: Vec<RegionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegionEntry {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
    pub label: String,
    pub winding: WindingRule,
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,
    pub path: Vec<PathCommand>,
}

fn default_occurrences() -> u32 {
    1
}

impl ModelDocument {
    pub fn from_model(model: &Model) -> Self {
        let regions = model
            .regions()
            .iter()
            .enumerate()
            .map(|(id, region)| RegionEntry {
                id: id as u32,
                parent: model.parent(id).map(|p| p as u32),
                label: region.label.clone(),
                winding: region.geometry.winding,
                occurrences: region.occurrences,
                path: region.geometry.commands.clone(),
            })
            .collect();
        Self {
            image_relative_path: model.image_relative_path.clone(),
            new_region_label: model.new_region_label.clone(),
            regions,
        }
    }

    /// Build the arena, resolving parent id references. Regions come out
    /// sorted by descending area.
    pub fn into_model(self) -> Result<Model> {
        let mut model = Model::new();
        model.image_relative_path = self.image_relative_path;
        model.new_region_label = self.new_region_label;

        let mut arena_ids = Vec::with_capacity(self.regions.len());
        for entry in &self.regions {
            let geometry = RegionGeometry::new(entry.winding, entry.path.clone());
            let id =
                model.push_region(Region::new(geometry, entry.label.clone(), entry.occurrences));
            arena_ids.push((entry.id, id));
        }

        for (index, entry) in self.regions.iter().enumerate() {
            if let Some(parent) = entry.parent {
                let parent_arena = arena_ids
                    .iter()
                    .find(|(doc_id, _)| *doc_id == parent)
                    .map(|&(_, arena)| arena)
                    .ok_or_else(|| {
                        Error::format(format!("region {} references unknown parent {parent}", entry.id))
                    })?;
                let child_arena = arena_ids[index].1;
                model
                    .set_parent(child_arena, Some(parent_arena))
                    .map_err(|_| Error::format("cyclic parent reference in model document"))?;
            }
        }

        model.sort_regions_by_area();
        Ok(model)
    }
}

pub fn read_model(path: &Path) -> Result<Model> {
    let bytes = std::fs::read(path)?;
    let document: ModelDocument = serde_json::from_slice(&bytes)
        .map_err(|e| Error::format(format!("malformed model document {}: {e}", path.display())))?;
    document.into_model()
}

pub fn write_model(path: &Path, model: &Model) -> Result<()> {
    let document = ModelDocument::from_model(model);
    let json = serde_json::to_vec_pretty(&document)
        .map_err(|e| Error::format(format!("model serialization failed: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}
