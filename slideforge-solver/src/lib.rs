//! Sphere-constraint packing for slideforge: the stride-4 sphere system,
//! octant-partitioned relaxation, and the wrangle-and-relax driving loop.

pub mod pack;
pub mod system;

pub use pack::{pack_region, wrangle_spheres, PackConfig, PackOutcome};
pub use system::{Partition, SphereSystem, DIRECT_LIMIT, STRIDE};
