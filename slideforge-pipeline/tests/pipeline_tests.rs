//! End-to-end pipeline tests against a directory store.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use slideforge_image::{
    tile_entry_name, ArchiveMetadata, DirectoryStore, Pyramid, SharedTileCache, TileCache,
    TileStore, METADATA_ENTRY,
};
use slideforge_model::{Model, Region, RegionGeometry};
use slideforge_pipeline::{GenerateReport, Pipeline, PipelineConfig, RendererRegistry};

fn sample_model(size: f32) -> Model {
    let mut model = Model::new();
    let tissue =
        model.push_region(Region::new(RegionGeometry::rect(0.0, 0.0, size, size), "stroma", 1));
    let lesion = model.push_region(Region::new(
        RegionGeometry::circle(size / 2.0, size / 2.0, size / 4.0),
        "cancer",
        1,
    ));
    model.set_parent(lesion, Some(tissue)).unwrap();
    model.sort_regions_by_area();
    model
}

fn test_config(tile: u32, max_lod: u32) -> PipelineConfig {
    PipelineConfig {
        tile_width: tile,
        tile_height: tile,
        max_lod,
        seed: 17,
        progress_period: Duration::from_secs(3600),
        ..PipelineConfig::default()
    }
}

fn run_pipeline(
    store: Arc<dyn TileStore>,
    size: f32,
    tile: u32,
    max_lod: u32,
) -> GenerateReport {
    let pipeline = Pipeline::new(
        sample_model(size),
        "model.json",
        RendererRegistry::new(),
        store,
        "slide",
        test_config(tile, max_lod),
    );
    pipeline.run().unwrap()
}

#[test]
fn test_generates_level0_and_lods() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TileStore> = Arc::new(DirectoryStore::create(dir.path()).unwrap());
    let report = run_pipeline(store.clone(), 256.0, 64, 2);

    // 4x4 level-0 tiles + 2x2 lod1 + 1x1 lod2.
    assert_eq!(report.written_tiles, 16 + 4 + 1);
    assert_eq!(report.skipped_tiles, 0);
    assert_eq!(report.levels, 3);
    assert!(store.exists(&tile_entry_name("slide", 0, 192, 192)));
    assert!(store.exists(&tile_entry_name("slide", 1, 64, 64)));
    assert!(store.exists(&tile_entry_name("slide", 2, 0, 0)));

    let metadata = ArchiveMetadata::from_bytes(&store.read(METADATA_ENTRY).unwrap()).unwrap();
    assert_eq!(metadata.levels.len(), 3);
    assert_eq!(metadata.level(1).unwrap().width, 128);
    assert_eq!(metadata.level(2).unwrap().width, 64);
}

#[test]
fn test_rerun_is_idempotent_and_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TileStore> = Arc::new(DirectoryStore::create(dir.path()).unwrap());
    let first = run_pipeline(store.clone(), 128.0, 64, 1);
    assert_eq!(first.written_tiles, 4 + 1);

    // Snapshot every entry's bytes.
    let mut entries = Vec::new();
    for lod in 0..=1u32 {
        for y in [0u32, 64] {
            for x in [0u32, 64] {
                let name = tile_entry_name("slide", lod, x, y);
                if store.exists(&name) {
                    entries.push((name.clone(), store.read(&name).unwrap()));
                }
            }
        }
    }
    assert!(!entries.is_empty());

    let second = run_pipeline(store.clone(), 128.0, 64, 1);
    assert_eq!(second.written_tiles, 0);
    assert_eq!(second.skipped_tiles, 4 + 1);
    for (name, bytes) in entries {
        assert_eq!(store.read(&name).unwrap(), bytes, "{name} changed on re-run");
    }
}

#[test]
fn test_lod_round_trip_against_level0() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TileStore> = Arc::new(DirectoryStore::create(dir.path()).unwrap());
    run_pipeline(store.clone(), 128.0, 32, 1);

    let cache: SharedTileCache = Arc::new(TileCache::new());
    let pyramid = Pyramid::open(store, "slide", cache).unwrap();
    let mut level0 = pyramid.level(0).unwrap();
    let mut level1 = pyramid.level(1).unwrap();
    assert_eq!(level1.width(), 64);

    // Spot-check the box-filter identity between the written levels.
    for (x, y) in [(0u32, 0u32), (10, 20), (33, 47), (63, 63)] {
        for shift in [0u32, 8, 16] {
            let mut sum = 0;
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                sum += (level0.pixel(x * 2 + dx, y * 2 + dy).unwrap() >> shift) & 0xFF;
            }
            let expected = sum / 4;
            let actual = (level1.pixel(x, y).unwrap() >> shift) & 0xFF;
            assert_eq!(actual, expected, "channel shift {shift} at ({x}, {y})");
        }
    }
}

#[test]
fn test_level_zero_content_hits_both_labels() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TileStore> = Arc::new(DirectoryStore::create(dir.path()).unwrap());
    run_pipeline(store.clone(), 128.0, 64, 0);

    let cache: SharedTileCache = Arc::new(TileCache::new());
    let pyramid = Pyramid::open(store, "slide", cache).unwrap();
    let mut level0 = pyramid.level(0).unwrap();

    // Center belongs to the cancer circle (red-ish), corner to the stroma
    // fill (pink-ish). Dither only touches the low 3 bits per channel.
    let center = level0.pixel(64, 64).unwrap();
    assert_eq!((center >> 16) & 0xF8, 0xF8);
    assert_eq!((center >> 8) & 0xF8, 0x00);
    let corner = level0.pixel(2, 2).unwrap();
    assert_eq!((corner >> 16) & 0xF8, 0xF8);
    assert_eq!((corner >> 8) & 0xF8, 0xA8);
}

#[test]
fn test_abort_flag_surfaces_as_aborted() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TileStore> = Arc::new(DirectoryStore::create(dir.path()).unwrap());
    let pipeline = Pipeline::new(
        sample_model(128.0),
        "model.json",
        RendererRegistry::new(),
        store,
        "slide",
        test_config(64, 1),
    );
    pipeline.abort_flag().store(true, Ordering::Relaxed);
    let error = pipeline.run().unwrap_err();
    assert!(matches!(error, slideforge_common::Error::Aborted));
}

#[test]
fn test_partial_output_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TileStore> = Arc::new(DirectoryStore::create(dir.path()).unwrap());
    let first = run_pipeline(store.clone(), 128.0, 64, 1);
    assert_eq!(first.written_tiles, 5);

    // Lose one level-0 tile; a re-run regenerates exactly that tile.
    let lost = tile_entry_name("slide", 0, 64, 0);
    std::fs::remove_file(dir.path().join(&lost)).unwrap();
    let second = run_pipeline(store.clone(), 128.0, 64, 1);
    assert_eq!(second.written_tiles, 1);
    assert!(store.exists(&lost));
}
