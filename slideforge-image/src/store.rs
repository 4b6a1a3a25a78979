//! Tile archive storage.
//!
//! An archive is a flat namespace of entries: one metadata document plus one
//! encoded image file per tile, named by a deterministic pattern. The
//! directory store is the only implementation here; packaging a directory
//! into a ZIP container is an external concern.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use slideforge_common::{Error, Result};

pub const METADATA_ENTRY: &str = "metadata.json";

/// Type tag written for every pyramid level.
pub const LEVEL_TYPE_TAG: &str = "slide_lod";

/// Deterministic tile entry name: base name, level, tile origin.
pub fn tile_entry_name(base: &str, lod: u32, tile_x: u32, tile_y: u32) -> String {
    format!("{base}_lod{lod}_{tile_x}_{tile_y}.png")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelInfo {
    pub id: u32,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub microns_per_pixel: f64,
    pub levels: Vec<LevelInfo>,
}

impl ArchiveMetadata {
    pub fn new(microns_per_pixel: f64) -> Self {
        Self { microns_per_pixel, levels: Vec::new() }
    }

    pub fn level(&self, id: u32) -> Option<&LevelInfo> {
        self.levels.iter().find(|level| level.id == id)
    }

    pub fn push_level(&mut self, level: LevelInfo) {
        if self.level(level.id).is_none() {
            self.levels.push(level);
            self.levels.sort_by_key(|level| level.id);
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::format(format!("metadata serialization failed: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::format(format!("malformed archive metadata: {e}")))
    }
}

/// Entry-addressed archive access, shared by the generation pipeline
/// (writes) and the pyramid reader.
pub trait TileStore: Send + Sync {
    fn exists(&self, name: &str) -> bool;
    fn read(&self, name: &str) -> Result<Vec<u8>>;
    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Archive laid out as one file per entry under a directory.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("archive directory not found: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl TileStore for DirectoryStore {
    fn exists(&self, name: &str) -> bool {
        self.entry_path(name).is_file()
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.entry_path(name))?)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        std::fs::write(self.entry_path(name), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_entry_name() {
        assert_eq!(tile_entry_name("slide", 3, 1024, 512), "slide_lod3_1024_512.png");
    }

    #[test]
    fn test_metadata_round_trip() {
        let mut metadata = ArchiveMetadata::new(0.2525);
        metadata.push_level(LevelInfo {
            id: 0,
            type_tag: LEVEL_TYPE_TAG.into(),
            width: 4096,
            height: 4096,
            tile_width: 512,
            tile_height: 512,
        });
        let bytes = metadata.to_bytes().unwrap();
        let back = ArchiveMetadata::from_bytes(&bytes).unwrap();
        assert_eq!(back.levels.len(), 1);
        assert_eq!(back.level(0).unwrap().width, 4096);
        assert!(back.level(1).is_none());
    }

    #[test]
    fn test_push_level_ignores_duplicates_and_sorts() {
        let mut metadata = ArchiveMetadata::new(0.25);
        let level = |id| LevelInfo {
            id,
            type_tag: LEVEL_TYPE_TAG.into(),
            width: 100,
            height: 100,
            tile_width: 64,
            tile_height: 64,
        };
        metadata.push_level(level(2));
        metadata.push_level(level(0));
        metadata.push_level(level(2));
        assert_eq!(metadata.levels.iter().map(|l| l.id).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::create(dir.path().join("archive")).unwrap();
        assert!(!store.exists("a.png"));
        store.write("a.png", b"bytes").unwrap();
        assert!(store.exists("a.png"));
        assert_eq!(store.read("a.png").unwrap(), b"bytes");
        assert!(store.read("missing.png").is_err());
    }
}
