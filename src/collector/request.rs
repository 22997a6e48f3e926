//! Tile requests, results and the decoder seam

use std::fmt;

use super::cancel::CancelToken;
use crate::error::DecodeError;
use crate::tiles::{ImageRegionTile, ImageSampleSize, IntRect};

/// Identity of one tile decode: page, region and sample size
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileSpec {
    /// Page number (0-indexed)
    pub page: usize,
    pub sample_size: ImageSampleSize,
    /// Region of the page in scaled pixels
    pub bounds: IntRect,
}

impl TileSpec {
    #[must_use]
    pub const fn new(page: usize, sample_size: ImageSampleSize, bounds: IntRect) -> Self {
        Self {
            page,
            sample_size,
            bounds,
        }
    }

    #[must_use]
    pub const fn from_tile(page: usize, tile: &ImageRegionTile) -> Self {
        Self::new(page, tile.sample_size, tile.bounds)
    }

    /// Key under which the decoded bitmap is cached
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.to_string()
    }

    /// Decoded bitmap size in pixels
    #[must_use]
    pub const fn output_size(&self) -> (u32, u32) {
        (
            self.sample_size.apply(self.bounds.width()),
            self.sample_size.apply(self.bounds.height()),
        )
    }
}

impl fmt::Display for TileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p{}:s{}:{},{},{},{}",
            self.page,
            self.sample_size,
            self.bounds.left,
            self.bounds.top,
            self.bounds.right,
            self.bounds.bottom
        )
    }
}

/// Output of one decode. `image` is `None` when decoding failed; callers
/// treat that as "try again later".
#[derive(Debug)]
pub struct DecodedTile<I> {
    pub spec: TileSpec,
    pub image: Option<I>,
}

impl<I> DecodedTile<I> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.is_none()
    }
}

/// Renders one tile. Called from worker threads; may be slow.
///
/// Long decodes should poll `cancel` and return [`DecodeError::Cancelled`].
pub trait TileDecoder: Send + Sync + 'static {
    type Image: Send + 'static;

    fn decode(&self, spec: &TileSpec, cancel: &CancelToken) -> Result<Self::Image, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_encodes_identity() {
        let spec = TileSpec::new(3, ImageSampleSize::new(2).unwrap(), IntRect::new(0, 512, 512, 1024));
        assert_eq!(spec.cache_key(), "p3:s2:0,512,512,1024");
        assert_eq!(spec.output_size(), (256, 256));

        let other = TileSpec { page: 4, ..spec };
        assert_ne!(spec.cache_key(), other.cache_key());
    }
}
