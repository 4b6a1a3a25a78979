//! Tiled multi-LOD image engine for slideforge.
//!
//! The pieces, bottom up: channel packing (`channels`), dense raster tiles
//! and the PNG codec boundary (`buffer`), the single-flight tile cache
//! (`cache`), the lazy tiled-image abstraction with box-filter subsampling
//! (`tiled`), archive storage (`store`) and store-backed pyramids
//! (`pyramid`).

pub mod buffer;
pub mod cache;
pub mod channels;
pub mod pyramid;
pub mod store;
pub mod tiled;

pub use buffer::{decode_png, encode_png, PixelBuffer};
pub use cache::{CacheJanitor, TileCache};
pub use channels::{argb, Channels, ColorModel};
pub use pyramid::Pyramid;
pub use store::{
    tile_entry_name, ArchiveMetadata, DirectoryStore, LevelInfo, TileStore, LEVEL_TYPE_TAG,
    METADATA_ENTRY,
};
pub use tiled::{
    tile_weight, PixelVisitor, SharedTileCache, TileAddress, TileKey, TileReader, TiledImage,
};
