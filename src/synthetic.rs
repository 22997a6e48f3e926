//! Procedural decoder used by the CLI and integration tests.
//!
//! Renders a checkerboard tinted per page, so tiles from different pages
//! and regions are distinguishable without a document renderer.

use image::{Rgba, RgbaImage};

use crate::collector::{CancelToken, TileDecoder, TileSpec};
use crate::error::DecodeError;

const CHECKER: u32 = 32;
const ROWS_PER_CANCEL_CHECK: u32 = 64;

#[derive(Clone, Copy, Debug)]
pub struct SyntheticDecoder {
    page_count: usize,
}

impl SyntheticDecoder {
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self { page_count }
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn pixel(page: usize, x: u32, y: u32) -> Rgba<u8> {
        let tint = (page.wrapping_mul(47) % 256) as u8;
        if (x / CHECKER + y / CHECKER) % 2 == 0 {
            Rgba([tint, 255 - tint, 128, 255])
        } else {
            Rgba([255 - tint, tint, 64, 255])
        }
    }
}

impl TileDecoder for SyntheticDecoder {
    type Image = RgbaImage;

    fn decode(&self, spec: &TileSpec, cancel: &CancelToken) -> Result<RgbaImage, DecodeError> {
        if spec.page >= self.page_count {
            return Err(DecodeError::PageOutOfRange { page: spec.page });
        }
        if spec.bounds.is_empty() {
            return Err(DecodeError::EmptyRegion);
        }

        let (width, height) = spec.output_size();
        let step = spec.sample_size.get();
        let mut image = RgbaImage::new(width, height);

        for y in 0..height {
            if y % ROWS_PER_CANCEL_CHECK == 0 && cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }
            let source_y = spec.bounds.top + y * step;
            for x in 0..width {
                let source_x = spec.bounds.left + x * step;
                image.put_pixel(x, y, Self::pixel(spec.page, source_x, source_y));
            }
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::{ImageSampleSize, IntRect};

    #[test]
    fn output_matches_sampled_region() {
        let decoder = SyntheticDecoder::new(2);
        let spec = TileSpec::new(1, ImageSampleSize::new(4).unwrap(), IntRect::new(0, 0, 100, 64));

        let image = decoder.decode(&spec, &CancelToken::new()).unwrap();
        assert_eq!(image.dimensions(), (25, 16));
    }

    #[test]
    fn rejects_bad_requests() {
        let decoder = SyntheticDecoder::new(1);
        let cancel = CancelToken::new();

        let out_of_range = TileSpec::new(1, ImageSampleSize::ONE, IntRect::new(0, 0, 8, 8));
        assert!(matches!(
            decoder.decode(&out_of_range, &cancel),
            Err(DecodeError::PageOutOfRange { page: 1 })
        ));

        let empty = TileSpec::new(0, ImageSampleSize::ONE, IntRect::new(8, 8, 8, 16));
        assert!(matches!(decoder.decode(&empty, &cancel), Err(DecodeError::EmptyRegion)));

        cancel.cancel();
        let valid = TileSpec::new(0, ImageSampleSize::ONE, IntRect::new(0, 0, 8, 8));
        assert!(matches!(decoder.decode(&valid, &cancel), Err(DecodeError::Cancelled)));
    }
}
