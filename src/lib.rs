pub mod cache;
pub mod collector;
pub mod error;
pub mod settings;
pub mod synthetic;
pub mod tiles;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::{BitmapBackend, BitmapRef, ImageCache, InnerImageCache, RgbaBackend};
pub use collector::{CollectorConfig, DecodedTile, TileCollector, TileDecoder, TileSpec};
pub use settings::Settings;
pub use tiles::{ImageRegionTileGrid, ImageSampleSize, TileGridCache, VisibleTilesResolver};
