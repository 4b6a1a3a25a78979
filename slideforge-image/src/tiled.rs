//! Tiled multi-LOD image abstraction.
//!
//! A `TiledImage` presents a conceptually huge raster as lazily materialized
//! tiles. Each instance carries a single-tile cursor: pixel access first
//! ensures the covering tile is materialized (through the shared
//! single-flight cache), then reads within it. Cursors are deliberately not
//! synchronized; concurrent consumers take independent views via
//! `new_parallel_views`.
//!
//! Coarser levels are box-filter subsampling wrappers chained from a finer
//! image; each level halves the linear dimensions.

use std::sync::Arc;

use slideforge_common::{quantize, Error, Result};

use crate::buffer::PixelBuffer;
use crate::cache::TileCache;
use crate::channels::{argb, Channels, ColorModel};

/// Identifies one materializable tile: pyramid level plus the tile's origin
/// in that level's pixel space, quantized to the optimal tile dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileAddress {
    pub lod: u32,
    pub x: u32,
    pub y: u32,
}

/// Cache key: tile address plus the identity of the image it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub image_id: String,
    pub address: TileAddress,
}

pub type SharedTileCache = Arc<TileCache<TileKey, Arc<PixelBuffer>>>;

/// Weigher for shared tile caches: resident tile bytes.
pub fn tile_weight(tile: &Arc<PixelBuffer>) -> usize {
    tile.byte_len()
}

/// Source of raw tiles for a store-backed image level.
pub trait TileReader: Send + Sync {
    /// Read and decode the tile whose origin is (x, y); `width`/`height` are
    /// the expected (edge-clipped) tile dimensions.
    fn read_tile(&self, x: u32, y: u32, width: u32, height: u32) -> Result<PixelBuffer>;
}

enum Backing {
    Reader(Arc<dyn TileReader>),
    /// Box-filter wrapper over the next finer level.
    Subsample(Box<TiledImage>),
}

impl Backing {
    fn view(&self) -> Backing {
        match self {
            Backing::Reader(reader) => Backing::Reader(reader.clone()),
            Backing::Subsample(parent) => Backing::Subsample(Box::new(parent.view())),
        }
    }
}

/// Per-tile iteration callback for `for_each_pixel_in_box`.
///
/// `end_of_patch` fires after each tile's pixels so callers can batch
/// per-tile post-processing.
pub trait PixelVisitor {
    fn pixel(&mut self, x: u32, y: u32, value: u32);
    fn end_of_patch(&mut self) {}
}

impl<F: FnMut(u32, u32, u32)> PixelVisitor for F {
    fn pixel(&mut self, x: u32, y: u32, value: u32) {
        self(x, y, value)
    }
}

pub struct TiledImage {
    base_id: String,
    lod: u32,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    channels: Channels,
    backing: Backing,
    cache: SharedTileCache,
    cursor: Option<(TileAddress, Arc<PixelBuffer>)>,
}

impl TiledImage {
    #[allow(clippy::too_many_arguments)]
    pub fn from_reader(
        base_id: impl Into<String>,
        lod: u32,
        width: u32,
        height: u32,
        tile_width: u32,
        tile_height: u32,
        channels: Channels,
        reader: Arc<dyn TileReader>,
        cache: SharedTileCache,
    ) -> Self {
        Self {
            base_id: base_id.into(),
            lod,
            width,
            height,
            tile_width,
            tile_height,
            channels,
            backing: Backing::Reader(reader),
            cache,
            cursor: None,
        }
    }

    pub fn id(&self) -> String {
        format!("{}#lod{}", self.base_id, self.lod)
    }

    pub fn lod(&self) -> u32 {
        self.lod
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// An equivalent handle onto the same image with an independent tile
    /// cursor. Tile data is shared through the cache.
    pub fn view(&self) -> TiledImage {
        TiledImage {
            base_id: self.base_id.clone(),
            lod: self.lod,
            width: self.width,
            height: self.height,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            channels: self.channels,
            backing: self.backing.view(),
            cache: self.cache.clone(),
            cursor: None,
        }
    }

    /// `n` handles usable concurrently from `n` worker contexts. View 0
    /// aliases the original's state (fresh cursor, same identity).
    pub fn new_parallel_views(&self, n: usize) -> Vec<TiledImage> {
        (0..n).map(|_| self.view()).collect()
    }

    /// The box-filtered next-coarser level (half width, half height).
    pub fn subsampled(&self) -> TiledImage {
        TiledImage {
            base_id: self.base_id.clone(),
            lod: self.lod + 1,
            width: self.width / 2,
            height: self.height / 2,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            channels: self.channels,
            backing: Backing::Subsample(Box::new(self.view())),
            cache: self.cache.clone(),
            cursor: None,
        }
    }

    /// View of this image at the requested pyramid level.
    ///
    /// Equal level: an equivalent handle. Coarser: subsampling wrappers
    /// chained onto this view. Finer: delegated to the finer ancestor if
    /// this is itself a subsampling wrapper; otherwise the data does not
    /// exist and cannot be sharpened back.
    pub fn lod_image(&self, lod: u32) -> Result<TiledImage> {
        if lod == self.lod {
            return Ok(self.view());
        }
        if lod > self.lod {
            let mut image = self.view();
            while image.lod < lod {
                if image.width / 2 == 0 || image.height / 2 == 0 {
                    return Err(Error::capability(format!(
                        "cannot subsample {} below one pixel (requested lod {lod})",
                        image.id()
                    )));
                }
                image = image.subsampled();
            }
            return Ok(image);
        }
        match &self.backing {
            Backing::Subsample(parent) => parent.lod_image(lod),
            Backing::Reader(_) => Err(Error::capability(format!(
                "{} holds no data finer than lod {} (requested lod {lod})",
                self.id(),
                self.lod
            ))),
        }
    }

    /// Tile address covering (x, y).
    pub fn tile_address(&self, x: u32, y: u32) -> TileAddress {
        TileAddress {
            lod: self.lod,
            x: quantize(x, self.tile_width),
            y: quantize(y, self.tile_height),
        }
    }

    /// Make sure the cursor holds the tile covering (x, y), materializing it
    /// through the shared cache if needed.
    pub fn ensure_tile_contains(&mut self, x: u32, y: u32) -> Result<TileAddress> {
        let address = self.tile_address(x, y);
        match &self.cursor {
            Some((current, _)) if *current == address => Ok(address),
            _ => {
                let tile = self.materialize(address, false)?;
                self.cursor = Some((address, tile));
                Ok(address)
            }
        }
    }

    /// Drop any cached copy of the tile covering (x, y) and recompute it.
    pub fn refresh_tile(&mut self, x: u32, y: u32) -> Result<TileAddress> {
        let address = self.tile_address(x, y);
        let tile = self.materialize(address, true)?;
        self.cursor = Some((address, tile));
        Ok(address)
    }

    pub fn pixel(&mut self, x: u32, y: u32) -> Result<u32> {
        self.check_bounds(x, y)?;
        self.ensure_tile_contains(x, y)?;
        let (address, tile) = self.cursor.as_ref().expect("cursor set by ensure_tile_contains");
        tile.pixel(x - address.x, y - address.y)
    }

    /// Tiled images materialized from a store or by subsampling are
    /// read-only; writes happen in `PixelBuffer` render targets before tiles
    /// are encoded.
    pub fn set_pixel(&mut self, x: u32, y: u32, _value: u32) -> Result<()> {
        self.check_bounds(x, y)?;
        Err(Error::capability(format!("{} is a read-only image", self.id())))
    }

    /// Visit every pixel of the box in row-major tile order, clipped to the
    /// image bounds, with an end-of-patch notification per tile block.
    pub fn for_each_pixel_in_box(
        &mut self,
        left: u32,
        top: u32,
        width: u32,
        height: u32,
        visitor: &mut dyn PixelVisitor,
    ) -> Result<()> {
        let right = self.width.min(left.saturating_add(width));
        let bottom = self.height.min(top.saturating_add(height));
        if left >= right || top >= bottom {
            return Ok(());
        }

        let mut y0 = top;
        while y0 < bottom {
            let next_top = bottom.min(quantize(y0, self.tile_height) + self.tile_height);
            let mut x0 = left;
            while x0 < right {
                let next_left = right.min(quantize(x0, self.tile_width) + self.tile_width);
                for y in y0..next_top {
                    for x in x0..next_left {
                        let value = self.pixel(x, y)?;
                        visitor.pixel(x, y, value);
                    }
                }
                visitor.end_of_patch();
                x0 = next_left;
            }
            y0 = next_top;
        }
        Ok(())
    }

    /// Materialize one tile without touching the cursor (used by the LOD
    /// build to force tiles in bulk).
    pub fn materialize_tile(&mut self, address: TileAddress) -> Result<Arc<PixelBuffer>> {
        self.materialize(address, false)
    }

    /// Iterate the tile origins of this level in row-major order.
    pub fn tile_addresses(&self) -> Vec<TileAddress> {
        let mut addresses = Vec::new();
        let mut y = 0;
        while y < self.height {
            let mut x = 0;
            while x < self.width {
                addresses.push(TileAddress { lod: self.lod, x, y });
                x += self.tile_width;
            }
            y += self.tile_height;
        }
        addresses
    }

    fn materialize(&mut self, address: TileAddress, refresh: bool) -> Result<Arc<PixelBuffer>> {
        let key = TileKey { image_id: self.id(), address };
        let tile_width = self.tile_width.min(self.width - address.x);
        let tile_height = self.tile_height.min(self.height - address.y);
        let channels = self.channels;
        let cache = self.cache.clone();
        let backing = &mut self.backing;

        let factory = || -> Result<Arc<PixelBuffer>> {
            match backing {
                Backing::Reader(reader) => {
                    let tile = reader.read_tile(address.x, address.y, tile_width, tile_height)?;
                    if tile.width() != tile_width || tile.height() != tile_height {
                        return Err(Error::format(format!(
                            "tile ({}, {}) has size {}x{}, expected {}x{}",
                            address.x,
                            address.y,
                            tile.width(),
                            tile.height(),
                            tile_width,
                            tile_height
                        )));
                    }
                    Ok(Arc::new(tile))
                }
                Backing::Subsample(parent) => {
                    let mut tile = PixelBuffer::new(tile_width, tile_height, channels);
                    let color = ColorModel::new(channels);
                    for y in 0..tile_height {
                        for x in 0..tile_width {
                            let sx = (address.x + x) * 2;
                            let sy = (address.y + y) * 2;
                            let p00 = parent.pixel(sx, sy)?;
                            let p10 = parent.pixel(sx + 1, sy)?;
                            let p01 = parent.pixel(sx, sy + 1)?;
                            let p11 = parent.pixel(sx + 1, sy + 1)?;
                            let red =
                                (color.red(p00) + color.red(p10) + color.red(p01) + color.red(p11)) / 4;
                            let green = (color.green(p00)
                                + color.green(p10)
                                + color.green(p01)
                                + color.green(p11))
                                / 4;
                            let blue = (color.blue(p00)
                                + color.blue(p10)
                                + color.blue(p01)
                                + color.blue(p11))
                                / 4;
                            let alpha = (color.alpha(p00)
                                + color.alpha(p10)
                                + color.alpha(p01)
                                + color.alpha(p11))
                                / 4;
                            tile.set_pixel_unchecked(x, y, argb(red, green, blue, alpha));
                        }
                    }
                    Ok(Arc::new(tile))
                }
            }
        };

        if refresh {
            cache.refresh(key, factory)
        } else {
            cache.get_or_compute(key, factory)
        }
    }

    fn check_bounds(&self, x: u32, y: u32) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(Error::Bounds {
                x: x as i64,
                y: y as i64,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}
