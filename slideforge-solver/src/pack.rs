//! Packing driver: relaxation plus boundary wrangling.
//!
//! Each round relocates spheres that drifted outside the target region to a
//! fresh random position inside the region's bounding disk, then runs one
//! relaxation pass. The loop ends when a round needed no relocations and the
//! relaxation residual is small enough, or when the wall-clock budget runs
//! out. A timeout is not an error: packing proceeds with whatever
//! configuration was reached.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::Rng;
use slideforge_model::RegionGeometry;

use crate::system::SphereSystem;

#[derive(Debug, Clone)]
pub struct PackConfig {
    /// Residual below which a round counts as converged, in length units.
    pub good_enough: f64,
    /// Wall-clock budget for the whole driving loop.
    pub timeout: Duration,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self { good_enough: 2.0, timeout: Duration::from_secs(120) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackOutcome {
    Converged { rounds: u32 },
    /// Best-effort result after the budget elapsed.
    TimedOut { rounds: u32 },
}

impl PackOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, PackOutcome::Converged { .. })
    }
}

/// Relocate every sphere whose center left the region into the region's
/// bounding disk, uniformly by area. Returns the number of spheres moved and
/// the largest distance from a moved center to the region outline.
pub fn wrangle_spheres(
    system: &mut SphereSystem,
    geometry: &RegionGeometry,
    vertices: &[[f64; 2]],
    rng: &mut StdRng,
) -> (usize, f64) {
    let bounds = geometry.bounds();
    let [cx, cy] = geometry.centroid();
    let max_r = (bounds.width() * bounds.width() + bounds.height() * bounds.height()).sqrt() / 2.0;

    let mut moved = 0;
    let mut worst: f64 = 0.0;
    for id in 0..system.sphere_count() {
        let x = system.x(id);
        let y = system.y(id);
        if geometry.contains(x, y) {
            continue;
        }
        let stray = vertices
            .iter()
            .map(|v| ((v[0] - x).powi(2) + (v[1] - y).powi(2)).sqrt())
            .fold(f64::MAX, f64::min);
        if stray != f64::MAX {
            worst = worst.max(stray);
        }
        let r = max_r * rng.gen::<f64>().sqrt();
        let a = rng.gen::<f64>() * 2.0 * std::f64::consts::PI;
        system.set_position(id, cx + r * a.cos(), cy + r * a.sin());
        moved += 1;
    }
    (moved, worst)
}

/// Drive relaxation and wrangling until the system settles inside the
/// region or the budget elapses.
pub fn pack_region(
    system: &mut SphereSystem,
    geometry: &RegionGeometry,
    config: &PackConfig,
    rng: &mut StdRng,
) -> PackOutcome {
    let vertices = geometry.vertices(slideforge_model::geometry::FLATTEN_TOLERANCE);
    let start = Instant::now();
    let mut rounds = 0;

    loop {
        let (moved, _) = wrangle_spheres(system, geometry, &vertices, rng);
        let residual = system.update2();
        rounds += 1;

        if moved == 0 && residual <= config.good_enough {
            tracing::debug!(rounds, residual, "packing converged");
            return PackOutcome::Converged { rounds };
        }
        if start.elapsed() >= config.timeout {
            tracing::warn!(
                rounds,
                residual,
                moved,
                "constraint solver timed out; proceeding with best-effort packing"
            );
            return PackOutcome::TimedOut { rounds };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_wrangle_moves_outsiders_only() {
        let geometry = RegionGeometry::rect(0.0, 0.0, 100.0, 100.0);
        let vertices = geometry.vertices(2.0);
        let mut system = SphereSystem::new();
        let inside = system.new_sphere(50.0, 50.0, 0.0, 5.0, 0);
        system.new_sphere(500.0, 500.0, 0.0, 5.0, 0);
        let mut rng = StdRng::seed_from_u64(3);

        let (moved, worst) = wrangle_spheres(&mut system, &geometry, &vertices, &mut rng);
        assert_eq!(moved, 1);
        assert!(worst > 0.0);
        assert_eq!((system.x(inside), system.y(inside)), (50.0, 50.0));
    }

    #[test]
    fn test_pack_square_scenario() {
        let geometry = RegionGeometry::rect(0.0, 0.0, 1000.0, 1000.0);
        let mut rng = StdRng::seed_from_u64(1);
        let mut system = SphereSystem::new();
        for _ in 0..50 {
            let r = 707.0 * rng.gen::<f64>().sqrt();
            let a = rng.gen::<f64>() * 2.0 * std::f64::consts::PI;
            system.new_sphere(500.0 + r * a.cos(), 500.0 + r * a.sin(), 0.0, 20.0, 0);
        }

        let config = PackConfig { good_enough: 1e-6, timeout: Duration::from_secs(60) };
        let outcome = pack_region(&mut system, &geometry, &config, &mut rng);
        assert!(outcome.converged());

        for i in 0..50 {
            for j in (i + 1)..50 {
                let d = ((system.x(i) - system.x(j)).powi(2)
                    + (system.y(i) - system.y(j)).powi(2))
                .sqrt();
                assert!(d >= 40.0 - 1e-5, "spheres {i} and {j} are {d} apart");
            }
            // Centers settled inside the square, within solver tolerance of
            // its edges.
            let (x, y) = (system.x(i), system.y(i));
            assert!((-1e-3..=1000.0 + 1e-3).contains(&x));
            assert!((-1e-3..=1000.0 + 1e-3).contains(&y));
        }
    }

    #[test]
    fn test_timeout_is_best_effort() {
        // An impossible demand: more footprint than region, zero budget.
        let geometry = RegionGeometry::rect(0.0, 0.0, 10.0, 10.0);
        let mut rng = StdRng::seed_from_u64(2);
        let mut system = SphereSystem::new();
        for _ in 0..64 {
            system.new_sphere(5.0, 5.0, 0.0, 8.0, 0);
        }
        let config = PackConfig { good_enough: 1e-9, timeout: Duration::from_millis(1) };
        let outcome = pack_region(&mut system, &geometry, &config, &mut rng);
        assert!(!outcome.converged());
    }
}
