//! Sphere systems and distance-constraint relaxation.
//!
//! Spheres live in a stride-4 position array (x, y, z, radius); ids are
//! dense array indices, stable for the lifetime of the system. Relaxation
//! pushes overlapping pairs apart until they exactly touch and pulls
//! explicitly constrained pairs to their touching distance. Positions are 3-D
//! even though this application keeps z at 0; the solver does not care.

use serde::{Deserialize, Serialize};

pub const X: usize = 0;
pub const Y: usize = 1;
pub const Z: usize = 2;
pub const R: usize = 3;
pub const STRIDE: usize = 4;

/// Above this subset size, relaxation partitions the spheres into octants
/// around their centroid and recurses instead of running the O(n^2) pass.
pub const DIRECT_LIMIT: usize = 4000;

/// Outcome of one octant cut.
#[derive(Debug)]
pub enum Partition {
    /// Eight (possibly empty) octant subsets around the centroid.
    Partitioned([Vec<usize>; 8]),
    /// The cut failed to separate anything: every sphere landed in a single
    /// octant. Callers fall back to direct relaxation.
    Degenerate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SphereSystem {
    spheres: Vec<f64>,
    colors: Vec<u32>,
    constraints: Vec<(u32, u32)>,
}

impl SphereSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sphere_count(&self) -> usize {
        self.spheres.len() / STRIDE
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn new_sphere(&mut self, x: f64, y: f64, z: f64, radius: f64, color: u32) -> usize {
        let id = self.sphere_count();
        self.spheres.extend_from_slice(&[x, y, z, radius]);
        self.colors.push(color);
        id
    }

    /// Record that two spheres should touch. The pair is stored unordered.
    pub fn new_constraint(&mut self, a: usize, b: usize) {
        let first = a.min(b) as u32;
        let second = a.max(b) as u32;
        self.constraints.push((first, second));
    }

    pub fn x(&self, id: usize) -> f64 {
        self.spheres[id * STRIDE + X]
    }

    pub fn y(&self, id: usize) -> f64 {
        self.spheres[id * STRIDE + Y]
    }

    pub fn z(&self, id: usize) -> f64 {
        self.spheres[id * STRIDE + Z]
    }

    pub fn radius(&self, id: usize) -> f64 {
        self.spheres[id * STRIDE + R]
    }

    pub fn color(&self, id: usize) -> u32 {
        self.colors[id]
    }

    pub fn set_position(&mut self, id: usize, x: f64, y: f64) {
        self.spheres[id * STRIDE + X] = x;
        self.spheres[id * STRIDE + Y] = y;
    }

    /// Centroid of the identified spheres.
    pub fn center(&self, ids: &[usize]) -> [f64; 3] {
        let mut center = [0.0; 3];
        for &id in ids {
            center[X] += self.x(id);
            center[Y] += self.y(id);
            center[Z] += self.z(id);
        }
        if !ids.is_empty() {
            let n = ids.len() as f64;
            center[X] /= n;
            center[Y] /= n;
            center[Z] /= n;
        }
        center
    }

    /// One symmetric relaxation pass: every overlapping pair is split apart
    /// around its midpoint, then every explicit constraint pair is pulled or
    /// pushed to its touching distance. Returns the largest correction.
    pub fn update(&mut self) -> f64 {
        let mut result: f64 = 0.0;
        let n = self.sphere_count();

        for i in 0..n {
            for j in (i + 1)..n {
                let touching = self.radius(i) + self.radius(j);
                let d = self.pair_distance(i, j);
                if d < touching {
                    result = result.max(touching - d);
                    self.scale_pair_symmetric(i, j, touching / if d == 0.0 { 1.0 } else { d });
                }
            }
        }

        for k in 0..self.constraints.len() {
            let (a, b) = self.constraints[k];
            let (a, b) = (a as usize, b as usize);
            let touching = self.radius(a) + self.radius(b);
            let d = self.pair_distance(a, b);
            result = result.max((touching - d).abs());
            self.scale_pair_symmetric(a, b, touching / if d == 0.0 { 1.0 } else { d });
        }

        result
    }

    /// One locality-ordered relaxation pass over the whole system.
    pub fn update2(&mut self) -> f64 {
        let mut ids: Vec<usize> = (0..self.sphere_count()).collect();
        self.relax_subset(&mut ids)
    }

    /// Cut the identified spheres into octants around their centroid.
    pub fn partition(&self, ids: &[usize]) -> Partition {
        let center = self.center(ids);
        let mut octants: [Vec<usize>; 8] = std::array::from_fn(|_| Vec::new());
        for &id in ids {
            let x0 = self.x(id) < center[X];
            let y0 = self.y(id) < center[Y];
            let z0 = self.z(id) < center[Z];
            let octant = ((!x0 as usize) << 2) | ((!y0 as usize) << 1) | (!z0 as usize);
            octants[octant].push(id);
        }
        if octants.iter().any(|subset| subset.len() == ids.len()) {
            Partition::Degenerate
        } else {
            Partition::Partitioned(octants)
        }
    }

    fn relax_subset(&mut self, ids: &mut [usize]) -> f64 {
        if ids.len() > DIRECT_LIMIT {
            match self.partition(ids) {
                Partition::Partitioned(mut octants) => {
                    let mut result: f64 = 0.0;
                    for subset in octants.iter_mut() {
                        result = result.max(self.relax_subset(subset));
                    }
                    return result;
                }
                Partition::Degenerate => {
                    tracing::warn!(
                        spheres = ids.len(),
                        "octant cut failed to separate; falling back to direct relaxation"
                    );
                }
            }
        }

        let center = self.center(ids);
        // Process in centroid-distance order for locality; ties break on id
        // so the order is stable.
        ids.sort_by(|&a, &b| {
            let da = self.distance_to(a, center);
            let db = self.distance_to(b, center);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
        });

        let n = ids.len();
        let mut result: f64 = 0.0;
        for i in 1..n {
            let id_i = ids[i];
            let r_i = self.radius(id_i);
            for j in 0..i {
                let id_j = ids[j];
                let touching = r_i + self.radius(id_j);
                let d = self.pair_distance(id_i, id_j);
                if d < touching {
                    result = result.max(touching - d);
                    // The earlier-processed sphere holds still; the later one
                    // takes the whole correction.
                    self.scale_pair_directed(id_j, id_i, touching / if d == 0.0 { 1.0 } else { d });
                }
            }
        }
        result
    }

    fn pair_distance(&self, a: usize, b: usize) -> f64 {
        let oa = a * STRIDE;
        let ob = b * STRIDE;
        let mut sum = 0.0;
        for k in 0..3 {
            let delta = self.spheres[oa + k] - self.spheres[ob + k];
            sum += delta * delta;
        }
        sum.sqrt()
    }

    fn distance_to(&self, id: usize, point: [f64; 3]) -> f64 {
        let offset = id * STRIDE;
        let mut sum = 0.0;
        for k in 0..3 {
            let delta = self.spheres[offset + k] - point[k];
            sum += delta * delta;
        }
        sum.sqrt()
    }

    /// Rescale the distance between both spheres around their midpoint. A
    /// deterministic pseudo-random direction breaks exact coincidence.
    fn scale_pair_symmetric(&mut self, a: usize, b: usize, scale: f64) {
        let oa = a * STRIDE;
        let ob = b * STRIDE;
        let p1 = [self.spheres[oa + X], self.spheres[oa + Y], self.spheres[oa + Z]];
        let p2 = [self.spheres[ob + X], self.spheres[ob + Y], self.spheres[ob + Z]];
        let middle = [(p1[0] + p2[0]) / 2.0, (p1[1] + p2[1]) / 2.0, (p1[2] + p2[2]) / 2.0];

        if p1 == middle && p2 == middle {
            let [dx, dy, dz] = pseudo_random_direction(oa, ob, scale / 2.0);
            self.spheres[oa + X] += dx;
            self.spheres[oa + Y] += dy;
            self.spheres[oa + Z] += dz;
            self.spheres[ob + X] -= dx;
            self.spheres[ob + Y] -= dy;
            self.spheres[ob + Z] -= dz;
        } else {
            for k in 0..3 {
                self.spheres[oa + k] = middle[k] + scale * (p1[k] - middle[k]);
                self.spheres[ob + k] = middle[k] + scale * (p2[k] - middle[k]);
            }
        }
    }

    /// Rescale the pair distance by moving only the second sphere.
    fn scale_pair_directed(&mut self, fixed: usize, moved: usize, scale: f64) {
        let of = fixed * STRIDE;
        let om = moved * STRIDE;
        let coincident = (0..3).all(|k| self.spheres[of + k] == self.spheres[om + k]);
        if coincident {
            let [dx, dy, dz] = pseudo_random_direction(of, om, scale);
            self.spheres[om + X] += dx;
            self.spheres[om + Y] += dy;
            self.spheres[om + Z] += dz;
        } else {
            for k in 0..3 {
                let anchor = self.spheres[of + k];
                self.spheres[om + k] = anchor + scale * (self.spheres[om + k] - anchor);
            }
        }
    }

    /// Explicit constraint pairs, as (id, id).
    pub fn constraints(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.constraints.iter().map(|&(a, b)| (a as usize, b as usize))
    }
}

/// Unit direction derived deterministically from the pair's array offsets,
/// scaled. Avoids a division by zero without pulling randomness into the
/// relaxation pass itself.
fn pseudo_random_direction(offset1: usize, offset2: usize, scale: f64) -> [f64; 3] {
    let theta = (offset1 + offset2) as f64;
    let phi = offset1 as f64 - offset2 as f64;
    [
        scale * theta.sin() * phi.cos(),
        scale * theta.sin() * phi.sin(),
        scale * theta.cos(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separation_violation(system: &SphereSystem) -> f64 {
        let n = system.sphere_count();
        let mut worst: f64 = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let touching = system.radius(i) + system.radius(j);
                let dx = system.x(i) - system.x(j);
                let dy = system.y(i) - system.y(j);
                let dz = system.z(i) - system.z(j);
                let d = (dx * dx + dy * dy + dz * dz).sqrt();
                worst = worst.max(touching - d);
            }
        }
        worst
    }

    #[test]
    fn test_disjoint_system_needs_no_correction() {
        let mut system = SphereSystem::new();
        system.new_sphere(0.0, 0.0, 0.0, 1.0, 0);
        system.new_sphere(10.0, 0.0, 0.0, 1.0, 0);
        assert_eq!(system.update2(), 0.0);
    }

    #[test]
    fn test_overlapping_pair_separates_exactly() {
        let mut system = SphereSystem::new();
        system.new_sphere(0.0, 0.0, 0.0, 5.0, 0);
        system.new_sphere(4.0, 0.0, 0.0, 5.0, 0);
        let correction = system.update2();
        assert!((correction - 6.0).abs() < 1e-9);
        let d = (system.x(0) - system.x(1)).abs();
        assert!((d - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_coincident_centers_fall_back_to_pseudo_random_direction() {
        let mut system = SphereSystem::new();
        system.new_sphere(3.0, 3.0, 0.0, 2.0, 0);
        system.new_sphere(3.0, 3.0, 0.0, 2.0, 0);
        system.update2();
        let dx = system.x(0) - system.x(1);
        let dy = system.y(0) - system.y(1);
        let dz = system.z(0) - system.z(1);
        let d = (dx * dx + dy * dy + dz * dz).sqrt();
        assert!((d - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_constraint_pulls_to_touching_distance() {
        let mut system = SphereSystem::new();
        let a = system.new_sphere(0.0, 0.0, 0.0, 3.0, 0);
        let b = system.new_sphere(100.0, 0.0, 0.0, 3.0, 0);
        system.new_constraint(a, b);
        for _ in 0..64 {
            if system.update() < 1e-9 {
                break;
            }
        }
        let d = (system.x(a) - system.x(b)).abs();
        assert!((d - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_packing_scenario_square() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut system = SphereSystem::new();
        // 50 radius-20 objects scattered in the bounding disk of
        // [0,1000]^2; total footprint is ~6% of the area.
        for _ in 0..50 {
            let r = 707.0 * rng.gen::<f64>().sqrt();
            let a = rng.gen::<f64>() * 2.0 * std::f64::consts::PI;
            system.new_sphere(500.0 + r * a.cos(), 500.0 + r * a.sin(), 0.0, 20.0, 0);
        }

        let mut residual = f64::MAX;
        for _ in 0..5000 {
            residual = system.update2();
            if residual < 1e-9 {
                break;
            }
        }
        assert!(residual < 1e-9);
        // Within numeric tolerance, no two centers closer than 40.
        assert!(separation_violation(&system) < 1e-6);
    }

    #[test]
    fn test_partition_separates_spread_spheres() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut system = SphereSystem::new();
        for _ in 0..100 {
            system.new_sphere(
                rng.gen::<f64>() * 100.0,
                rng.gen::<f64>() * 100.0,
                rng.gen::<f64>() * 100.0,
                1.0,
                0,
            );
        }
        let ids: Vec<usize> = (0..system.sphere_count()).collect();
        match system.partition(&ids) {
            Partition::Partitioned(octants) => {
                let total: usize = octants.iter().map(Vec::len).sum();
                assert_eq!(total, 100);
                assert!(octants.iter().all(|subset| subset.len() < 100));
            }
            Partition::Degenerate => panic!("spread spheres must partition"),
        }
    }

    #[test]
    fn test_partition_degenerate_when_coincident() {
        let mut system = SphereSystem::new();
        for _ in 0..10 {
            system.new_sphere(5.0, 5.0, 5.0, 1.0, 0);
        }
        let ids: Vec<usize> = (0..10).collect();
        assert!(matches!(system.partition(&ids), Partition::Degenerate));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut system = SphereSystem::new();
        let a = system.new_sphere(1.0, 2.0, 0.0, 4.0, 0xFF00FF00);
        let b = system.new_sphere(5.0, 6.0, 0.0, 4.0, 0xFF0000FF);
        system.new_constraint(a, b);
        let json = serde_json::to_string(&system).unwrap();
        let back: SphereSystem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sphere_count(), 2);
        assert_eq!(back.constraint_count(), 1);
        assert_eq!(back.color(b), 0xFF0000FF);
        assert_eq!(back.radius(a), 4.0);
    }
}
