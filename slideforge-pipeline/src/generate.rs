//! Tile generation pipeline.
//!
//! Level 0 is rendered from the region model across a bounded worker pool;
//! every coarser level is then derived strictly level-by-level through the
//! box-filter image abstraction. Both passes skip tiles that already exist
//! in the store, so re-running against partial output resumes instead of
//! redoing work.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use slideforge_common::{Error, Result, Throttle};
use slideforge_image::{
    encode_png, tile_entry_name, ArchiveMetadata, CacheJanitor, Channels, LevelInfo, PixelBuffer,
    Pyramid, SharedTileCache, TileCache, TileStore, TiledImage, LEVEL_TYPE_TAG, METADATA_ENTRY,
};
use slideforge_model::{subdivide_region, Model, Region};

use crate::checkpoint::CheckpointWriter;
use crate::noise::add_quantization_noise;
use crate::raster::RenderTarget;
use crate::renderer::RendererRegistry;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    /// Coarsest pyramid level to derive (level 0 is always generated).
    pub max_lod: u32,
    pub seed: u64,
    pub microns_per_pixel: f64,
    /// ARGB background the tiles are cleared to.
    pub background: u32,
    /// Fraction of available parallelism given to the worker pool.
    pub cpu_load: f64,
    /// Regions larger than this (either bounding dimension) are split
    /// before rendering or packing.
    pub subdivision_threshold: f64,
    pub checkpoint_path: Option<PathBuf>,
    pub progress_period: Duration,
    /// Tile cache high-water mark in bytes; crossing it triggers background
    /// eviction.
    pub cache_high_water_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_width: 512,
            tile_height: 512,
            max_lod: 7,
            seed: 1,
            microns_per_pixel: 0.2525,
            background: 0xFFF3F3F3,
            cpu_load: 0.75,
            subdivision_threshold: 64000.0,
            checkpoint_path: None,
            progress_period: Duration::from_secs(60),
            cache_high_water_bytes: 512 << 20,
        }
    }
}

#[derive(Debug, Default)]
pub struct GenerateReport {
    pub written_tiles: u64,
    pub skipped_tiles: u64,
    pub levels: u32,
    pub elapsed: Duration,
}

/// Pool size: a fraction of available parallelism, leaving headroom for the
/// host.
pub fn worker_count(cpu_load: f64) -> usize {
    ((num_cpus::get() as f64 * cpu_load) as usize).max(1)
}

pub struct Pipeline {
    model: Model,
    model_path: String,
    registry: RendererRegistry,
    store: Arc<dyn TileStore>,
    base: String,
    config: PipelineConfig,
    abort: Arc<AtomicBool>,
    cache: SharedTileCache,
}

impl Pipeline {
    pub fn new(
        model: Model,
        model_path: impl Into<String>,
        registry: RendererRegistry,
        store: Arc<dyn TileStore>,
        base: impl Into<String>,
        config: PipelineConfig,
    ) -> Self {
        let cache: SharedTileCache =
            Arc::new(TileCache::with_weigher(slideforge_image::tile_weight));
        Self {
            model,
            model_path: model_path.into(),
            registry,
            store,
            base: base.into(),
            config,
            abort: Arc::new(AtomicBool::new(false)),
            cache,
        }
    }

    /// Cooperative cancellation flag: once set, in-flight work finishes but
    /// no new tile or packing job starts.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn run(&self) -> Result<GenerateReport> {
        let started = Instant::now();
        let throttle = Throttle::new(self.config.progress_period);
        let _janitor = CacheJanitor::spawn(
            self.cache.clone(),
            self.config.cache_high_water_bytes,
            Duration::from_secs(10),
        );

        let bounds = self.model.bounds();
        if bounds.is_empty() {
            return Err(Error::format("model has no regions"));
        }
        let width = bounds.max_x.ceil().max(0.0) as u32;
        let height = bounds.max_y.ceil().max(0.0) as u32;
        if width == 0 || height == 0 {
            return Err(Error::format("model bounds are degenerate"));
        }

        let workers = worker_count(self.config.cpu_load);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::format(format!("worker pool construction failed: {e}")))?;
        tracing::info!(width, height, workers, regions = self.model.len(), "generating slide");

        let subdivided = self.subdivide_model();
        let checkpoint = self.restore_checkpoint();

        self.prepare_regions(&pool, &subdivided, checkpoint.as_ref())?;

        let mut report = GenerateReport::default();
        self.write_level0_metadata(width, height)?;
        self.generate_level0(&pool, &subdivided, width, height, &throttle, &mut report)?;
        report.levels = 1;

        for lod in 1..=self.config.max_lod {
            if (width >> lod) == 0 || (height >> lod) == 0 {
                break;
            }
            self.generate_lod_level(&pool, workers, lod, &throttle, &mut report)?;
            report.levels += 1;
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            written = report.written_tiles,
            skipped = report.skipped_tiles,
            levels = report.levels,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "slide generation finished"
        );
        Ok(report)
    }

    fn subdivide_model(&self) -> Vec<Region> {
        let mut subdivided = Vec::new();
        for region in self.model.regions() {
            subdivide_region(region, self.config.subdivision_threshold, &mut subdivided);
        }
        tracing::debug!(
            regions = self.model.len(),
            subdivided = subdivided.len(),
            "regions subdivided for rendering"
        );
        subdivided
    }

    fn restore_checkpoint(&self) -> Option<CheckpointWriter> {
        let path = self.config.checkpoint_path.as_ref()?;
        let writer = CheckpointWriter::new(path);
        if let Some(checkpoint) = CheckpointWriter::load(path, &self.model_path) {
            match CheckpointWriter::restore(&checkpoint, &self.registry) {
                Ok(()) => tracing::info!(path = %path.display(), "renderer checkpoint restored"),
                Err(error) => {
                    tracing::warn!(%error, "ignoring unusable renderer checkpoint")
                }
            }
        }
        Some(writer)
    }

    /// Shared pre-computation: run every renderer's packing pass, bounded by
    /// the packing semaphore inside the renderers, persisting the renderer
    /// state after each region that converged.
    fn prepare_regions(
        &self,
        pool: &rayon::ThreadPool,
        subdivided: &[Region],
        checkpoint: Option<&CheckpointWriter>,
    ) -> Result<()> {
        pool.install(|| {
            subdivided.par_iter().enumerate().try_for_each(|(region_id, region)| {
                if self.abort.load(Ordering::Relaxed) {
                    return Err(Error::Aborted);
                }
                let updated =
                    self.registry.renderer(&region.label).before_render(region_id, region)?;
                if updated {
                    if let Some(writer) = checkpoint {
                        if let Err(error) = writer.persist(&self.model_path, &self.registry) {
                            tracing::warn!(%error, "renderer checkpoint persist failed");
                        }
                    }
                }
                Ok(())
            })
        })
    }

    fn write_level0_metadata(&self, width: u32, height: u32) -> Result<()> {
        let mut metadata = if self.store.exists(METADATA_ENTRY) {
            ArchiveMetadata::from_bytes(&self.store.read(METADATA_ENTRY)?)?
        } else {
            ArchiveMetadata::new(self.config.microns_per_pixel)
        };
        metadata.push_level(LevelInfo {
            id: 0,
            type_tag: LEVEL_TYPE_TAG.into(),
            width,
            height,
            tile_width: self.config.tile_width,
            tile_height: self.config.tile_height,
        });
        self.store.write(METADATA_ENTRY, &metadata.to_bytes()?)
    }

    fn generate_level0(
        &self,
        pool: &rayon::ThreadPool,
        subdivided: &[Region],
        width: u32,
        height: u32,
        throttle: &Throttle,
        report: &mut GenerateReport,
    ) -> Result<()> {
        let mut jobs = Vec::new();
        let mut skipped = 0u64;
        let mut y = 0;
        while y < height {
            let mut x = 0;
            while x < width {
                if self.store.exists(&tile_entry_name(&self.base, 0, x, y)) {
                    skipped += 1;
                } else {
                    jobs.push((x, y));
                }
                x += self.config.tile_width;
            }
            y += self.config.tile_height;
        }
        let total = jobs.len() as u64 + skipped;
        let done = AtomicU64::new(0);

        pool.install(|| {
            jobs.par_iter().try_for_each(|&(x, y)| {
                if self.abort.load(Ordering::Relaxed) {
                    return Err(Error::Aborted);
                }
                self.render_tile(subdivided, x, y, width, height).map_err(|error| {
                    // Give the log enough context to reproduce the tile in
                    // isolation before the run aborts.
                    tracing::error!(tile_x = x, tile_y = y, %error, "tile job failed");
                    self.abort.store(true, Ordering::Relaxed);
                    error
                })?;
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if throttle.ready() {
                    tracing::info!(finished, total, "level 0 progress");
                }
                Ok(())
            })
        })?;

        report.written_tiles += jobs.len() as u64;
        report.skipped_tiles += skipped;
        Ok(())
    }

    fn render_tile(
        &self,
        subdivided: &[Region],
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let tile_width = self.config.tile_width.min(width - x);
        let tile_height = self.config.tile_height.min(height - y);
        let mut buffer = PixelBuffer::new(tile_width, tile_height, Channels::RGBA8);
        buffer.fill(self.config.background);

        let mut target =
            RenderTarget { buffer: &mut buffer, origin_x: x as f64, origin_y: y as f64 };
        for (region_id, region) in subdivided.iter().enumerate() {
            self.registry.renderer(&region.label).render(region_id, region, &mut target)?;
        }

        let mut rng = StdRng::seed_from_u64(
            self.config.seed ^ (((x as u64) << 32) | y as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        add_quantization_noise(&mut buffer, &mut rng);

        let bytes = encode_png(&buffer)?;
        self.store.write(&tile_entry_name(&self.base, 0, x, y), &bytes)
    }

    /// Derive one coarser level from the already-written level below it.
    fn generate_lod_level(
        &self,
        pool: &rayon::ThreadPool,
        workers: usize,
        lod: u32,
        throttle: &Throttle,
        report: &mut GenerateReport,
    ) -> Result<()> {
        let pyramid = Pyramid::open(self.store.clone(), self.base.clone(), self.cache.clone())?;
        let image = pyramid.level(lod)?;

        let mut missing = Vec::new();
        let mut skipped = 0u64;
        for address in image.tile_addresses() {
            if self.store.exists(&tile_entry_name(&self.base, lod, address.x, address.y)) {
                skipped += 1;
            } else {
                missing.push(address);
            }
        }
        let total = missing.len() as u64 + skipped;

        let (sender, receiver) = crossbeam_channel::unbounded();
        for address in missing.iter().copied() {
            sender.send(address).expect("tile queue send");
        }
        drop(sender);

        // Workers must not share a tile cursor; each one gets its own
        // parallel view of the level.
        let failure: Mutex<Option<Error>> = Mutex::new(None);
        let done = AtomicU64::new(0);
        pool.scope(|scope| {
            for mut view in image.new_parallel_views(workers) {
                let receiver = receiver.clone();
                let failure = &failure;
                let done = &done;
                scope.spawn(move |_| {
                    while let Ok(address) = receiver.recv() {
                        if self.abort.load(Ordering::Relaxed) {
                            break;
                        }
                        match self.write_lod_tile(&mut view, lod, address.x, address.y) {
                            Ok(()) => {
                                done.fetch_add(1, Ordering::Relaxed);
                                if throttle.ready() {
                                    tracing::info!(
                                        lod,
                                        finished = done.load(Ordering::Relaxed),
                                        total,
                                        "subsampling progress"
                                    );
                                }
                            }
                            Err(error) => {
                                tracing::error!(
                                    lod,
                                    tile_x = address.x,
                                    tile_y = address.y,
                                    %error,
                                    "subsampled tile job failed"
                                );
                                self.abort.store(true, Ordering::Relaxed);
                                *failure.lock() = Some(error);
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(error) = failure.into_inner() {
            return Err(error);
        }
        if self.abort.load(Ordering::Relaxed) {
            return Err(Error::Aborted);
        }

        let mut metadata = ArchiveMetadata::from_bytes(&self.store.read(METADATA_ENTRY)?)?;
        metadata.push_level(LevelInfo {
            id: lod,
            type_tag: LEVEL_TYPE_TAG.into(),
            width: image.width(),
            height: image.height(),
            tile_width: image.tile_width(),
            tile_height: image.tile_height(),
        });
        self.store.write(METADATA_ENTRY, &metadata.to_bytes()?)?;

        report.written_tiles += missing.len() as u64;
        report.skipped_tiles += skipped;
        Ok(())
    }

    fn write_lod_tile(&self, view: &mut TiledImage, lod: u32, x: u32, y: u32) -> Result<()> {
        let address = slideforge_image::TileAddress { lod, x, y };
        let tile = view.materialize_tile(address)?;
        let bytes = encode_png(&tile)?;
        self.store.write(&tile_entry_name(&self.base, lod, x, y), &bytes)
    }
}
