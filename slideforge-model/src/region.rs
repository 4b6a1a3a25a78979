//! Labeled regions and the model arena.
//!
//! Regions live in an index-addressable arena; the parent/child relation is
//! a side table of indices rather than embedded back-pointers, so there is a
//! single source of truth for the tree. Children lists are derived by scan.

use serde::{Deserialize, Serialize};
use slideforge_common::{Error, Result};

use crate::geometry::{Bounds, RegionGeometry, Ring, WindingRule};

pub type RegionId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub geometry: RegionGeometry,
    pub label: String,
    /// Relative occurrence weight; drives how many objects of this kind the
    /// packing renderer places.
    pub occurrences: u32,
}

impl Region {
    pub fn new(geometry: RegionGeometry, label: impl Into<String>, occurrences: u32) -> Self {
        Self { geometry, label: label.into(), occurrences }
    }
}

/// A region collection plus model-level attributes.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub image_relative_path: String,
    pub new_region_label: String,
    regions: Vec<Region>,
    parents: Vec<Option<RegionId>>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn push_region(&mut self, region: Region) -> RegionId {
        self.regions.push(region);
        self.parents.push(None);
        self.regions.len() - 1
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id]
    }

    pub fn region_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id]
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn parent(&self, id: RegionId) -> Option<RegionId> {
        self.parents[id]
    }

    /// Derived children list, in arena order.
    pub fn children(&self, id: RegionId) -> Vec<RegionId> {
        self.parents
            .iter()
            .enumerate()
            .filter_map(|(child, &parent)| (parent == Some(id)).then_some(child))
            .collect()
    }

    /// Reassign a region's parent. Rejects assignments that would close a
    /// cycle through the composite tree.
    pub fn set_parent(&mut self, child: RegionId, parent: Option<RegionId>) -> Result<()> {
        if let Some(parent) = parent {
            let mut ancestor = Some(parent);
            while let Some(current) = ancestor {
                if current == child {
                    return Err(Error::capability(format!(
                        "parent assignment {child} -> {parent} would create a cycle"
                    )));
                }
                ancestor = self.parents[current];
            }
        }
        self.parents[child] = parent;
        Ok(())
    }

    /// Remove a region. Its children are detached (parent cleared) and
    /// remaining parent links are reindexed.
    pub fn remove_region(&mut self, id: RegionId) -> Region {
        let region = self.regions.remove(id);
        self.parents.remove(id);
        for parent in self.parents.iter_mut() {
            *parent = match *parent {
                Some(p) if p == id => None,
                Some(p) if p > id => Some(p - 1),
                other => other,
            };
        }
        region
    }

    /// Union of all region bounds.
    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::empty();
        for region in &self.regions {
            bounds.union(&region.geometry.bounds());
        }
        bounds
    }

    /// Sort regions by descending area, keeping parent links intact.
    ///
    /// Larger regions paint first, so nested structures drawn later end up
    /// on top.
    pub fn sort_regions_by_area(&mut self) {
        let mut order: Vec<RegionId> = (0..self.regions.len()).collect();
        let areas: Vec<f64> = self.regions.iter().map(|r| r.geometry.area()).collect();
        order.sort_by(|&a, &b| {
            areas[b].partial_cmp(&areas[a]).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut new_index = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }

        let mut regions = Vec::with_capacity(self.regions.len());
        let mut parents = Vec::with_capacity(self.parents.len());
        for &old in &order {
            regions.push(self.regions[old].clone());
            parents.push(self.parents[old].map(|p| new_index[p]));
        }
        self.regions = regions;
        self.parents = parents;
    }
}

/// Split a region along its longer bounded dimension until neither exceeds
/// `max_dimension`, intersecting the geometry with each half.
///
/// Keeps individual render and packing operations bounded for slide-scale
/// regions.
pub fn subdivide_region(region: &Region, max_dimension: f64, out: &mut Vec<Region>) {
    let bounds = region.geometry.bounds();
    if bounds.is_empty() {
        return;
    }

    let (rings_a, rings_b): (Vec<Ring>, Vec<Ring>) = if bounds.height() >= max_dimension {
        let mid = bounds.min_y + (bounds.height() / 2.0).floor();
        (
            region.geometry.clip_to_rect(bounds.min_x, bounds.min_y, bounds.max_x, mid),
            region.geometry.clip_to_rect(bounds.min_x, mid, bounds.max_x, bounds.max_y),
        )
    } else if bounds.width() >= max_dimension {
        let mid = bounds.min_x + (bounds.width() / 2.0).floor();
        (
            region.geometry.clip_to_rect(bounds.min_x, bounds.min_y, mid, bounds.max_y),
            region.geometry.clip_to_rect(mid, bounds.min_y, bounds.max_x, bounds.max_y),
        )
    } else {
        out.push(region.clone());
        return;
    };

    for rings in [rings_a, rings_b] {
        let geometry = RegionGeometry::from_rings(WindingRule::EvenOdd, &rings);
        if !geometry.is_degenerate() {
            let half = Region::new(geometry, region.label.clone(), region.occurrences);
            subdivide_region(&half, max_dimension, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RegionGeometry;

    fn square(size: f32, label: &str) -> Region {
        Region::new(RegionGeometry::rect(0.0, 0.0, size, size), label, 1)
    }

    #[test]
    fn test_parent_child_relation() {
        let mut model = Model::new();
        let a = model.push_region(square(100.0, "stroma"));
        let b = model.push_region(square(10.0, "nucleus"));
        model.set_parent(b, Some(a)).unwrap();
        assert_eq!(model.parent(b), Some(a));
        assert_eq!(model.children(a), vec![b]);
        model.set_parent(b, None).unwrap();
        assert!(model.children(a).is_empty());
    }

    #[test]
    fn test_cycle_rejected() {
        let mut model = Model::new();
        let a = model.push_region(square(100.0, "a"));
        let b = model.push_region(square(50.0, "b"));
        let c = model.push_region(square(25.0, "c"));
        model.set_parent(b, Some(a)).unwrap();
        model.set_parent(c, Some(b)).unwrap();
        assert!(model.set_parent(a, Some(c)).is_err());
        assert!(model.set_parent(a, Some(a)).is_err());
    }

    #[test]
    fn test_remove_region_reindexes_parents() {
        let mut model = Model::new();
        let a = model.push_region(square(100.0, "a"));
        let b = model.push_region(square(50.0, "b"));
        let c = model.push_region(square(25.0, "c"));
        model.set_parent(b, Some(a)).unwrap();
        model.set_parent(c, Some(b)).unwrap();

        model.remove_region(a);
        // b slid down to index 0, c to 1; b was detached, c still under b.
        assert_eq!(model.parent(0), None);
        assert_eq!(model.parent(1), Some(0));
    }

    #[test]
    fn test_sort_by_area_keeps_links() {
        let mut model = Model::new();
        let small = model.push_region(square(10.0, "small"));
        let big = model.push_region(square(100.0, "big"));
        model.set_parent(small, Some(big)).unwrap();

        model.sort_regions_by_area();
        assert_eq!(model.region(0).label, "big");
        assert_eq!(model.region(1).label, "small");
        assert_eq!(model.parent(1), Some(0));
    }

    #[test]
    fn test_subdivide_threshold() {
        let region = square(100.0, "tissue");
        let mut out = Vec::new();
        subdivide_region(&region, 64.0, &mut out);
        assert_eq!(out.len(), 4);
        let total: f64 = out.iter().map(|r| r.geometry.area()).sum();
        assert!((total - 10000.0).abs() < 1.0);

        out.clear();
        subdivide_region(&region, 256.0, &mut out);
        assert_eq!(out.len(), 1);
    }
}
