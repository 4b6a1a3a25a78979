//! # Slideforge CLI
//!
//! Generates synthetic whole-slide image archives from region model
//! documents:
//!   slideforge generate --model breast.json             # archive next to the model
//!   slideforge generate --model breast.json -o out/slide --renderer renderers.json
//!   slideforge info --model breast.json                 # model statistics

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use slideforge_image::{DirectoryStore, TileStore};
use slideforge_model::read_model;
use slideforge_pipeline::{
    build_registry, load_renderer_config, Pipeline, PipelineConfig, RendererRegistry, Semaphore,
};

mod cli;

#[derive(Parser)]
#[command(name = "slideforge")]
#[command(about = "Synthetic whole-slide image generator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a model into a tiled multi-LOD archive directory
    Generate {
        /// Region model document (JSON)
        #[arg(long)]
        model: PathBuf,
        /// Output base path; defaults to the model path without extension
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Tile width in pixels
        #[arg(long, default_value = "512")]
        tile_width: u32,
        /// Tile height in pixels; defaults to the tile width
        #[arg(long)]
        tile_height: Option<u32>,
        /// Renderer configuration document (JSON)
        #[arg(long)]
        renderer: Option<PathBuf>,
        /// Coarsest pyramid level to derive
        #[arg(long, default_value = "7")]
        max_lod: u32,
        /// Seed for placement and dither randomness
        #[arg(long, default_value = "1")]
        seed: u64,
    },
    /// Print model statistics
    Info {
        /// Region model document (JSON)
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Generate { model, output, tile_width, tile_height, renderer, max_lod, seed } => {
            generate(model, output, tile_width, tile_height, renderer, max_lod, seed)
        }
        Commands::Info { model } => info(model),
    }
}

fn generate(
    model_path: PathBuf,
    output: Option<PathBuf>,
    tile_width: u32,
    tile_height: Option<u32>,
    renderer: Option<PathBuf>,
    max_lod: u32,
    seed: u64,
) -> Result<()> {
    let started = Instant::now();
    let model = read_model(&model_path)
        .with_context(|| format!("reading model {}", model_path.display()))?;

    let output_base = output.unwrap_or_else(|| model_path.with_extension(""));
    let base_name = output_base
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "slide".to_string());

    let config = PipelineConfig {
        tile_width,
        tile_height: tile_height.unwrap_or(tile_width),
        max_lod,
        seed,
        checkpoint_path: Some(output_base.with_extension("renderers.bin")),
        ..PipelineConfig::default()
    };

    let registry = match &renderer {
        Some(path) => {
            let doc = load_renderer_config(path)
                .with_context(|| format!("reading renderer config {}", path.display()))?;
            let base_dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let gate = Arc::new(Semaphore::new(slideforge_pipeline::worker_count(
                PipelineConfig::default().cpu_load,
            )));
            build_registry(&doc, base_dir, gate, Default::default(), seed)
                .context("building renderer registry")?
        }
        None => RendererRegistry::new(),
    };

    let store: Arc<dyn TileStore> = Arc::new(
        DirectoryStore::create(&output_base)
            .with_context(|| format!("creating archive directory {}", output_base.display()))?,
    );

    println!("Generating {} ...", output_base.display());
    let spinner = cli::progress::create_spinner("rendering tiles");
    let pipeline = Pipeline::new(
        model,
        model_path.to_string_lossy().into_owned(),
        registry,
        store,
        base_name,
        config,
    );
    let report = pipeline.run();
    spinner.finish_and_clear();

    let report = report.context("pipeline run failed")?;
    println!(
        "Wrote {} tiles across {} levels ({} already present) in {:.2}s",
        report.written_tiles,
        report.levels,
        report.skipped_tiles,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn info(model_path: PathBuf) -> Result<()> {
    let model = read_model(&model_path)
        .with_context(|| format!("reading model {}", model_path.display()))?;
    let bounds = model.bounds();

    println!("Model: {}", model_path.display());
    if !model.image_relative_path.is_empty() {
        println!("Image: {}", model.image_relative_path);
    }
    println!("Bounds: {:.0} x {:.0}", bounds.max_x.max(0.0), bounds.max_y.max(0.0));
    println!("Regions: {}", model.len());
    for (id, region) in model.regions().iter().enumerate() {
        let parent = match model.parent(id) {
            Some(parent) => format!(" (child of {parent})"),
            None => String::new(),
        };
        println!(
            "  [{id}] {:<20} area {:>12.0}  occurrences {}{parent}",
            region.label,
            region.geometry.area(),
            region.occurrences
        );
    }
    Ok(())
}
