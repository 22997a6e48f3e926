//! Multi-resolution tile grids
//!
//! A grid has one base tile covering the whole image at the coarsest useful
//! sample size (always available as a fallback) and, for every finer power
//! of two down to 1, a layer of tiles partitioning the image so that each
//! decoded tile is roughly `cell_size` pixels on a side.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use log::trace;
use lru::LruCache;

use super::sample_size::ImageSampleSize;
use super::types::{IntRect, IntSize, RectF, Size};

/// Edge length of a decoded tile in pixels
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Distinct zoom levels remembered by [`TileGridCache`]
const GRID_CACHE_CAPACITY: usize = 16;

/// One decodable region of the image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageRegionTile {
    pub sample_size: ImageSampleSize,
    /// Pixel bounds within the (scaled) image
    pub bounds: IntRect,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageRegionTileGrid {
    /// Image size the bounds refer to
    pub image_size: IntSize,
    pub base: ImageRegionTile,
    /// Finer layers keyed by sample size; never contains the base size
    pub foreground: BTreeMap<ImageSampleSize, Vec<ImageRegionTile>>,
}

impl ImageRegionTileGrid {
    /// Build the grid for `unscaled` shown at `scale` inside `viewport`.
    #[must_use]
    pub fn generate(scale: f32, viewport: Size, unscaled: IntSize, cell_size: u32) -> Self {
        let scale = normalize_scale(scale);
        let image_size = unscaled.scaled(scale);
        let cell_size = cell_size.max(1);

        let base_sample = ImageSampleSize::for_canvas(viewport, image_size);
        let base = ImageRegionTile {
            sample_size: base_sample,
            bounds: IntRect::from_size(image_size),
        };

        let foreground: BTreeMap<_, _> = base_sample
            .descending()
            .skip(1)
            .map(|sample| (sample, Self::layer(image_size, sample, cell_size)))
            .collect();

        trace!(
            "generated grid for {}x{} at scale {scale}: base={base_sample}, {} layers",
            image_size.width,
            image_size.height,
            foreground.len()
        );

        Self {
            image_size,
            base,
            foreground,
        }
    }

    /// Partition the image into `cols x rows` tiles, row-major. Cell edges
    /// are `index * length / count` rounded to nearest, so the tiles cover
    /// the image exactly.
    fn layer(image: IntSize, sample: ImageSampleSize, cell_size: u32) -> Vec<ImageRegionTile> {
        let cols = (image.width / sample.get() / cell_size).max(1);
        let rows = (image.height / sample.get() / cell_size).max(1);

        let edge = |index: u32, count: u32, length: u32| -> u32 {
            let (index, count, length) = (u64::from(index), u64::from(count), u64::from(length));
            ((2 * index * length + count) / (2 * count)) as u32
        };

        let mut tiles = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                tiles.push(ImageRegionTile {
                    sample_size: sample,
                    bounds: IntRect::new(
                        edge(col, cols, image.width),
                        edge(row, rows, image.height),
                        edge(col + 1, cols, image.width),
                        edge(row + 1, rows, image.height),
                    ),
                });
            }
        }
        tiles
    }

    /// Base size followed by the foreground sizes, coarsest first
    pub fn sample_sizes(&self) -> impl Iterator<Item = ImageSampleSize> + '_ {
        std::iter::once(self.base.sample_size).chain(self.foreground.keys().rev().copied())
    }

    /// Layer to draw at `zoom` (displayed pixels per image pixel), never
    /// coarser than the base tile
    #[must_use]
    pub fn sample_size_for_zoom(&self, zoom: f32) -> ImageSampleSize {
        ImageSampleSize::for_zoom(zoom).min(self.base.sample_size)
    }

    /// All tiles of one layer; the base size yields the base tile
    #[must_use]
    pub fn tiles_at(&self, sample: ImageSampleSize) -> &[ImageRegionTile] {
        if sample == self.base.sample_size {
            std::slice::from_ref(&self.base)
        } else {
            self.foreground.get(&sample).map(Vec::as_slice).unwrap_or(&[])
        }
    }

    /// Tiles of one layer overlapping `rect` (image pixels)
    pub fn tiles_intersecting<'a>(
        &'a self,
        sample: ImageSampleSize,
        rect: &'a RectF,
    ) -> impl Iterator<Item = &'a ImageRegionTile> + 'a {
        self.tiles_at(sample)
            .iter()
            .filter(move |tile| tile.bounds.intersects(rect))
    }
}

/// Zero, negative and non-finite scales fall back to 1
fn normalize_scale(scale: f32) -> f32 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct GridKey {
    scale: u32,
    viewport_width: u32,
    viewport_height: u32,
    image: IntSize,
}

impl GridKey {
    fn new(scale: f32, viewport: Size, image: IntSize) -> Self {
        Self {
            scale: normalize_scale(scale).to_bits(),
            viewport_width: viewport.width.to_bits(),
            viewport_height: viewport.height.to_bits(),
            image,
        }
    }
}

/// Memoizes grids so repeated layout passes at one zoom reuse geometry.
pub struct TileGridCache {
    cell_size: u32,
    grids: LruCache<GridKey, Arc<ImageRegionTileGrid>>,
}

impl TileGridCache {
    #[must_use]
    pub fn new(cell_size: u32) -> Self {
        Self {
            cell_size,
            grids: LruCache::new(
                NonZeroUsize::new(GRID_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    #[must_use]
    pub fn cell_size(&self) -> u32 {
        self.cell_size
    }

    /// Grid for the given inputs, generated on first use
    pub fn grid(&mut self, scale: f32, viewport: Size, unscaled: IntSize) -> Arc<ImageRegionTileGrid> {
        let key = GridKey::new(scale, viewport, unscaled);
        if let Some(grid) = self.grids.get(&key) {
            return Arc::clone(grid);
        }

        let grid = Arc::new(ImageRegionTileGrid::generate(
            scale,
            viewport,
            unscaled,
            self.cell_size,
        ));
        self.grids.put(key, Arc::clone(&grid));
        grid
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.grids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn clear(&mut self) {
        self.grids.clear();
    }
}

impl Default for TileGridCache {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> ImageRegionTileGrid {
        ImageRegionTileGrid::generate(
            1.0,
            Size::new(1080.0, 1920.0),
            IntSize::new(9000, 7000),
            DEFAULT_TILE_SIZE,
        )
    }

    #[test]
    fn base_covers_whole_image() {
        let grid = grid();
        // 1080 / 9000 = 0.12 -> 8
        assert_eq!(grid.base.sample_size.get(), 8);
        assert_eq!(grid.base.bounds, IntRect::new(0, 0, 9000, 7000));
        let sizes: Vec<u32> = grid.sample_sizes().map(ImageSampleSize::get).collect();
        assert_eq!(sizes, vec![8, 4, 2, 1]);
    }

    #[test]
    fn layers_partition_image() {
        let grid = grid();
        for (sample, tiles) in &grid.foreground {
            let area: u64 = tiles.iter().map(|t| t.bounds.area()).sum();
            assert_eq!(area, 9000 * 7000, "layer {sample} leaves gaps");
            assert!(tiles.iter().all(|t| !t.bounds.is_empty()));
            assert!(tiles.iter().all(|t| t.bounds.right <= 9000 && t.bounds.bottom <= 7000));
        }

        // 9000 / 1 / 512 = 17 cols, 7000 / 512 = 13 rows
        assert_eq!(grid.tiles_at(ImageSampleSize::ONE).len(), 17 * 13);
        // 9000 / 4 / 512 = 4 cols, 1750 / 512 = 3 rows
        assert_eq!(grid.tiles_at(ImageSampleSize::new(4).unwrap()).len(), 4 * 3);
    }

    #[test]
    fn foreground_sizes_divide_base() {
        let grid = grid();
        let base = grid.base.sample_size.get();
        for (sample, tiles) in &grid.foreground {
            assert!(sample.get().is_power_of_two());
            assert_eq!(base % sample.get(), 0);
            assert!(sample.get() < base);
            assert!(tiles.iter().all(|t| t.sample_size == *sample));
        }
    }

    #[test]
    fn generation_is_deterministic() {
        assert_eq!(grid(), grid());
    }

    #[test]
    fn small_image_has_only_base() {
        let grid = ImageRegionTileGrid::generate(
            1.0,
            Size::new(1080.0, 1920.0),
            IntSize::new(800, 600),
            DEFAULT_TILE_SIZE,
        );
        assert_eq!(grid.base.sample_size, ImageSampleSize::ONE);
        assert!(grid.foreground.is_empty());
        assert_eq!(grid.tiles_at(ImageSampleSize::ONE), &[grid.base]);
    }

    #[test]
    fn scale_enlarges_image() {
        let grid = ImageRegionTileGrid::generate(
            2.0,
            Size::new(1000.0, 1000.0),
            IntSize::new(1000, 1000),
            DEFAULT_TILE_SIZE,
        );
        assert_eq!(grid.image_size, IntSize::new(2000, 2000));
        assert_eq!(grid.base.sample_size.get(), 2);
        assert_eq!(grid.tiles_at(ImageSampleSize::ONE).len(), 3 * 3);
    }

    #[test]
    fn zoom_picks_layer() {
        let grid = grid();
        assert_eq!(grid.sample_size_for_zoom(0.01).get(), 8);
        assert_eq!(grid.sample_size_for_zoom(0.3).get(), 2);
        assert_eq!(grid.sample_size_for_zoom(3.0).get(), 1);
    }

    #[test]
    fn intersecting_tiles() {
        let grid = grid();
        let rect = RectF::new(0.0, 0.0, 600.0, 600.0);
        let hits: Vec<_> = grid
            .tiles_intersecting(ImageSampleSize::ONE, &rect)
            .collect();
        // 9000 / 17 ~ 529 wide, 7000 / 13 ~ 538 tall: 2x2 cells
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn cache_keys_on_effective_scale() {
        let mut cache = TileGridCache::default();
        let viewport = Size::new(1080.0, 1920.0);
        let image = IntSize::new(2480, 3508);

        let unit = cache.grid(1.0, viewport, image);
        for fallback in [0.0, -2.0, f32::NAN, f32::INFINITY] {
            assert!(Arc::ptr_eq(&unit, &cache.grid(fallback, viewport, image)));
        }

        let tiny = cache.grid(1e-7, viewport, image);
        assert!(!Arc::ptr_eq(&unit, &tiny));
        assert_eq!(tiny.image_size, IntSize::new(1, 1));

        let huge = cache.grid(5000.0, viewport, IntSize::new(1, 1));
        let huger = cache.grid(6000.0, viewport, IntSize::new(1, 1));
        assert_eq!(huge.image_size, IntSize::new(5000, 5000));
        assert_eq!(huger.image_size, IntSize::new(6000, 6000));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn cache_reuses_grid_per_scale() {
        let mut cache = TileGridCache::default();
        let viewport = Size::new(1080.0, 1920.0);
        let image = IntSize::new(2480, 3508);

        let a = cache.grid(1.0, viewport, image);
        let b = cache.grid(1.0, viewport, image);
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache.grid(1.5, viewport, image);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
