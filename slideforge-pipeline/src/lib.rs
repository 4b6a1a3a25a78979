//! Tile generation pipeline for slideforge: renderer dispatch, sprite
//! packing, software compositing, quantization-noise dithering, and the
//! level-0 + LOD generation passes over a bounded worker pool.

pub mod checkpoint;
pub mod config;
pub mod generate;
pub mod noise;
pub mod raster;
pub mod renderer;
pub mod semaphore;
pub mod sprite;

pub use checkpoint::{CheckpointWriter, RendererCheckpoint};
pub use config::{build_registry, load_renderer_config, parse_color, RendererConfigDoc};
pub use generate::{worker_count, GenerateReport, Pipeline, PipelineConfig};
pub use renderer::{
    label_color, AdjacentObjectsRenderer, FlatFillRenderer, RegionRenderer, RendererRegistry,
};
pub use semaphore::Semaphore;
pub use sprite::{extract_texture_units, TextureObject, TextureUnit};
