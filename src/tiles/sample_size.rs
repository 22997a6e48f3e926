//! Power-of-two downscale factors

use std::fmt;

use super::types::{IntSize, Size};

/// Largest factor we will ever pick; keeps doubling from overflowing.
const MAX_SAMPLE_SIZE: u32 = 1 << 30;

/// Power-of-two downscale factor applied while decoding a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageSampleSize(u32);

impl ImageSampleSize {
    pub const ONE: Self = Self(1);

    /// `None` unless `size` is a power of two
    #[must_use]
    pub const fn new(size: u32) -> Option<Self> {
        if size.is_power_of_two() {
            Some(Self(size))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Coarsest power of two not exceeding `1 / zoom`.
    ///
    /// A zoom of zero (and anything non-finite or negative) maps to 1.
    #[must_use]
    pub fn for_zoom(zoom: f32) -> Self {
        if !(zoom > 0.0) || !zoom.is_finite() {
            return Self::ONE;
        }

        let limit = 1.0 / zoom;
        let mut size = 1u32;
        while size < MAX_SAMPLE_SIZE && (size * 2) as f32 <= limit {
            size *= 2;
        }
        Self(size)
    }

    /// Sample size for showing `image` fitted inside `canvas`
    #[must_use]
    pub fn for_canvas(canvas: Size, image: IntSize) -> Self {
        if !(canvas.min_dimension() > 0.0) || image.is_empty() {
            return Self::ONE;
        }

        let zoom = (canvas.width / image.width as f32).min(canvas.height / image.height as f32);
        Self::for_zoom(zoom)
    }

    /// Next finer level, or `None` at full resolution
    #[must_use]
    pub const fn halved(self) -> Option<Self> {
        if self.0 < 2 {
            None
        } else {
            Some(Self(self.0 / 2))
        }
    }

    /// This size followed by every finer level down to 1
    pub fn descending(self) -> impl Iterator<Item = Self> {
        std::iter::successors(Some(self), |size| size.halved())
    }

    /// Pixels along one axis after downscaling, rounded up
    #[must_use]
    pub const fn apply(self, pixels: u32) -> u32 {
        pixels.div_ceil(self.0)
    }
}

impl Default for ImageSampleSize {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for ImageSampleSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_maps_to_power_of_two() {
        assert_eq!(ImageSampleSize::for_zoom(1.0).get(), 1);
        assert_eq!(ImageSampleSize::for_zoom(2.5).get(), 1);
        assert_eq!(ImageSampleSize::for_zoom(0.5).get(), 2);
        assert_eq!(ImageSampleSize::for_zoom(0.3).get(), 2);
        assert_eq!(ImageSampleSize::for_zoom(0.25).get(), 4);
        assert_eq!(ImageSampleSize::for_zoom(0.1).get(), 8);
    }

    #[test]
    fn degenerate_zoom_is_one() {
        assert_eq!(ImageSampleSize::for_zoom(0.0), ImageSampleSize::ONE);
        assert_eq!(ImageSampleSize::for_zoom(-1.0), ImageSampleSize::ONE);
        assert_eq!(ImageSampleSize::for_zoom(f32::NAN), ImageSampleSize::ONE);
        assert_eq!(ImageSampleSize::for_zoom(f32::MIN_POSITIVE).get(), 1 << 30);
    }

    #[test]
    fn canvas_fit_uses_tighter_axis() {
        let canvas = Size::new(1000.0, 1000.0);
        // 4000 wide fits at 0.25, 1500 tall at 0.66
        let size = ImageSampleSize::for_canvas(canvas, IntSize::new(4000, 1500));
        assert_eq!(size.get(), 4);
        assert_eq!(
            ImageSampleSize::for_canvas(Size::new(0.0, 10.0), IntSize::new(10, 10)),
            ImageSampleSize::ONE
        );
    }

    #[test]
    fn descending_halves_to_one() {
        let levels: Vec<u32> = ImageSampleSize::new(8)
            .unwrap()
            .descending()
            .map(ImageSampleSize::get)
            .collect();
        assert_eq!(levels, vec![8, 4, 2, 1]);
        assert!(ImageSampleSize::new(6).is_none());
    }
}
