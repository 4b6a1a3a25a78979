//! Renderer-state checkpoints.
//!
//! Packed sphere systems are expensive; after each region's packing
//! converges the pipeline persists every stateful renderer so an interrupted
//! run resumes without re-solving. Concurrent persists race benignly:
//! last-writer-wins by a monotonically increasing update counter, stale
//! writers drop their snapshot instead of merging.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slideforge_common::{Error, Result};

use crate::renderer::RendererRegistry;

#[derive(Debug, Serialize, Deserialize)]
pub struct RendererCheckpoint {
    /// Identity of the model the states belong to.
    pub model_path: String,
    /// Exported renderer state, keyed by region label.
    pub states: HashMap<String, Vec<u8>>,
}

pub struct CheckpointWriter {
    path: PathBuf,
    counter: AtomicU64,
    write_lock: Mutex<()>,
}

impl CheckpointWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), counter: AtomicU64::new(0), write_lock: Mutex::new(()) }
    }

    /// Load a checkpoint if one exists for this model.
    pub fn load(path: &Path, model_path: &str) -> Option<RendererCheckpoint> {
        let bytes = std::fs::read(path).ok()?;
        let checkpoint: RendererCheckpoint = bincode::deserialize(&bytes).ok()?;
        (checkpoint.model_path == model_path).then_some(checkpoint)
    }

    /// Restore exported states into the registry's bound renderers.
    pub fn restore(checkpoint: &RendererCheckpoint, registry: &RendererRegistry) -> Result<()> {
        for (label, renderer) in registry.bound_labels() {
            if let Some(bytes) = checkpoint.states.get(label) {
                renderer.import_state(bytes)?;
            }
        }
        Ok(())
    }

    /// Snapshot every stateful renderer and persist atomically. Only the
    /// caller holding the highest ticket at lock time writes; earlier
    /// tickets return without touching the file.
    pub fn persist(&self, model_path: &str, registry: &RendererRegistry) -> Result<bool> {
        let ticket = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.write_lock.lock();
        if ticket != self.counter.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let mut states = HashMap::new();
        for (label, renderer) in registry.bound_labels() {
            if let Some(bytes) = renderer.export_state() {
                states.insert(label.to_string(), bytes);
            }
        }
        let checkpoint = RendererCheckpoint { model_path: model_path.to_string(), states };
        let bytes = bincode::serialize(&checkpoint)
            .map_err(|e| Error::format(format!("checkpoint serialization failed: {e}")))?;

        let staging = self.path.with_extension("bak");
        std::fs::write(&staging, bytes)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
