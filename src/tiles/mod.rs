//! Tile geometry: sample sizes, multi-resolution grids and visibility

mod grid;
mod sample_size;
mod types;
mod visible;

pub use grid::{DEFAULT_TILE_SIZE, ImageRegionTile, ImageRegionTileGrid, TileGridCache};
pub use sample_size::ImageSampleSize;
pub use types::{IntRect, IntSize, RectF, Size};
pub use visible::{VisibleTiles, VisibleTilesResolver};
