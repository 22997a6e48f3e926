//! Reference-counted bitmap caching

mod backend;
mod bitmap;
mod image_cache;
mod inner;

pub use backend::{BitmapBackend, Clock, RgbaBackend, SystemClock};
pub use bitmap::{BitmapRef, BitmapState};
pub use image_cache::{DEFAULT_NODE_BYTES, DEFAULT_PAGE_BYTES, ImageCache, ImageCacheStats};
pub use inner::{CacheStats, DEFAULT_CANDIDATE_TIMEOUT, InnerImageCache, PoolConfig};
