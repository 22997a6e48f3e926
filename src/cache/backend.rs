//! Platform seams for the bitmap cache: image sizing/freeing and time

use std::time::Instant;

use image::RgbaImage;

use crate::error::BackendError;

/// Capability the cache needs from whatever owns the decoded images.
///
/// `calculate_size` is called once per insert and the result is stored with
/// the entry. `recycle` is called at most once per image, only after its
/// reference count has reached zero.
pub trait BitmapBackend: Send + Sync + 'static {
    type Image: Send + Sync + 'static;

    /// Byte footprint of one decoded image
    fn calculate_size(&self, image: &Self::Image) -> usize;

    /// Release any native resources held by the image
    fn recycle(&self, image: &Self::Image) -> Result<(), BackendError>;
}

/// Backend for plain in-memory RGBA buffers.
///
/// Memory is returned when the last `Arc` to the entry drops, so `recycle`
/// has nothing native to free.
#[derive(Clone, Copy, Debug, Default)]
pub struct RgbaBackend;

impl BitmapBackend for RgbaBackend {
    type Image = RgbaImage;

    fn calculate_size(&self, image: &RgbaImage) -> usize {
        image.as_raw().len()
    }

    fn recycle(&self, _image: &RgbaImage) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Source of "now" for candidate-pool expiry
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall-clock [`Clock`] backed by [`Instant::now`]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
