//! Store-backed image pyramids.
//!
//! A `Pyramid` opens a tile archive and exposes its levels as tiled images.
//! Levels present in the metadata are read (and decoded) straight from the
//! store; a missing coarser level is synthesized by chaining box-filter
//! wrappers from the nearest known coarser ancestor.

use std::sync::Arc;

use slideforge_common::{Error, Result};

use crate::buffer::{decode_png, PixelBuffer};
use crate::channels::Channels;
use crate::store::{tile_entry_name, ArchiveMetadata, LevelInfo, TileStore, METADATA_ENTRY};
use crate::tiled::{SharedTileCache, TileReader, TiledImage};

struct StoreTileReader {
    store: Arc<dyn TileStore>,
    base: String,
    lod: u32,
}

impl TileReader for StoreTileReader {
    fn read_tile(&self, x: u32, y: u32, _width: u32, _height: u32) -> Result<PixelBuffer> {
        let name = tile_entry_name(&self.base, self.lod, x, y);
        let bytes = self.store.read(&name)?;
        decode_png(&bytes)
    }
}

pub struct Pyramid {
    store: Arc<dyn TileStore>,
    base: String,
    metadata: ArchiveMetadata,
    cache: SharedTileCache,
}

impl Pyramid {
    /// Open an archive. The metadata must describe at least level 0.
    pub fn open(store: Arc<dyn TileStore>, base: impl Into<String>, cache: SharedTileCache) -> Result<Self> {
        let bytes = store.read(METADATA_ENTRY)?;
        let metadata = ArchiveMetadata::from_bytes(&bytes)?;
        if metadata.level(0).is_none() {
            return Err(Error::format("archive metadata has no level 0"));
        }
        Ok(Self { store, base: base.into(), metadata, cache })
    }

    pub fn metadata(&self) -> &ArchiveMetadata {
        &self.metadata
    }

    pub fn store(&self) -> &Arc<dyn TileStore> {
        &self.store
    }

    /// Image view at the requested level: store-backed when written,
    /// otherwise subsampled down from the nearest coarser written level.
    pub fn level(&self, lod: u32) -> Result<TiledImage> {
        if let Some(info) = self.metadata.level(lod) {
            return Ok(self.store_level(info));
        }

        let nearest = self
            .metadata
            .levels
            .iter()
            .filter(|level| level.id < lod)
            .max_by_key(|level| level.id)
            .ok_or_else(|| {
                Error::capability(format!("pyramid holds no level at or below lod {lod}"))
            })?;
        self.store_level(nearest).lod_image(lod)
    }

    fn store_level(&self, info: &LevelInfo) -> TiledImage {
        let reader = Arc::new(StoreTileReader {
            store: self.store.clone(),
            base: self.base.clone(),
            lod: info.id,
        });
        TiledImage::from_reader(
            &self.base,
            info.id,
            info.width,
            info.height,
            info.tile_width,
            info.tile_height,
            Channels::RGBA8,
            reader,
            self.cache.clone(),
        )
    }
}
