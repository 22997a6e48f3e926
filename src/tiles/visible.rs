//! Which fixed-size tiles a viewport touches at a given scale
//!
//! The resolver carries no synchronization. It is meant to be owned by the
//! layout pass and driven from that single thread; `&mut self` on the query
//! keeps it that way.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use super::grid::DEFAULT_TILE_SIZE;
use super::sample_size::ImageSampleSize;
use super::types::{IntSize, RectF};

/// Matrix of visible `(row, col)` tile indices
#[derive(Clone, Debug, PartialEq)]
pub struct VisibleTiles {
    pub scale: f32,
    pub row_top: u32,
    pub row_bottom: u32,
    pub col_left: u32,
    pub col_right: u32,
    /// Row index to the inclusive column range shown in that row
    pub rows: BTreeMap<u32, RangeInclusive<u32>>,
    pub tile_count: usize,
    /// Decode factor matching `scale`
    pub sub_sample: ImageSampleSize,
}

impl VisibleTiles {
    fn empty(scale: f32) -> Self {
        Self {
            scale,
            row_top: 0,
            row_bottom: 0,
            col_left: 0,
            col_right: 0,
            rows: BTreeMap::new(),
            tile_count: 0,
            sub_sample: ImageSampleSize::for_zoom(scale),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tile_count == 0
    }

    /// Visible cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&row, cols)| cols.clone().map(move |col| (row, col)))
    }

    #[must_use]
    pub fn contains(&self, row: u32, col: u32) -> bool {
        self.rows.get(&row).is_some_and(|cols| cols.contains(&col))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Query {
    viewport: RectF,
    scale: f32,
}

pub struct VisibleTilesResolver {
    tile_size: u32,
    full_size: IntSize,
    last: Option<(Query, VisibleTiles)>,
}

impl VisibleTilesResolver {
    /// `full_size` is the unscaled content size the tiles partition
    #[must_use]
    pub fn new(tile_size: u32, full_size: IntSize) -> Self {
        Self {
            tile_size: tile_size.max(1),
            full_size,
            last: None,
        }
    }

    #[must_use]
    pub fn with_default_tile_size(full_size: IntSize) -> Self {
        Self::new(DEFAULT_TILE_SIZE, full_size)
    }

    pub fn set_full_size(&mut self, full_size: IntSize) {
        if self.full_size != full_size {
            self.full_size = full_size;
            self.last = None;
        }
    }

    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[must_use]
    pub fn max_col(&self) -> u32 {
        self.full_size
            .width
            .div_ceil(self.tile_size)
            .saturating_sub(1)
    }

    #[must_use]
    pub fn max_row(&self) -> u32 {
        self.full_size
            .height
            .div_ceil(self.tile_size)
            .saturating_sub(1)
    }

    /// Tiles covering `viewport` (canvas pixels) with content drawn at
    /// `scale`. Repeating the previous query returns the remembered result.
    pub fn get_visible_tiles(&mut self, viewport: RectF, scale: f32) -> &VisibleTiles {
        let query = Query { viewport, scale };
        let stale = self.last.as_ref().is_none_or(|(last, _)| *last != query);
        if stale {
            let tiles = self.resolve(viewport, scale);
            self.last = Some((query, tiles));
        }

        &self
            .last
            .get_or_insert_with(|| (query, VisibleTiles::empty(scale)))
            .1
    }

    fn resolve(&self, viewport: RectF, scale: f32) -> VisibleTiles {
        let scaled_tile = self.tile_size as f32 * scale;
        if !(scaled_tile > 0.0) || !scaled_tile.is_finite() || viewport.is_empty() {
            return VisibleTiles::empty(scale);
        }

        let content = RectF::new(
            0.0,
            0.0,
            self.full_size.width as f32,
            self.full_size.height as f32,
        )
        .scale(scale);
        let outside = viewport.right <= content.left
            || viewport.left >= content.right
            || viewport.bottom <= content.top
            || viewport.top >= content.bottom;
        if self.full_size.is_empty() || outside {
            return VisibleTiles::empty(scale);
        }

        let (max_col, max_row) = (self.max_col(), self.max_row());
        let col_left = clamp_index((viewport.left / scaled_tile).floor(), max_col);
        let row_top = clamp_index((viewport.top / scaled_tile).floor(), max_row);
        let col_right = clamp_index((viewport.right / scaled_tile).ceil() - 1.0, max_col);
        let row_bottom = clamp_index((viewport.bottom / scaled_tile).ceil() - 1.0, max_row);

        let rows: BTreeMap<_, _> = (row_top..=row_bottom)
            .map(|row| (row, col_left..=col_right))
            .collect();
        let tile_count = rows.len() * (col_right - col_left + 1) as usize;

        VisibleTiles {
            scale,
            row_top,
            row_bottom,
            col_left,
            col_right,
            rows,
            tile_count,
            sub_sample: ImageSampleSize::for_zoom(scale),
        }
    }
}

fn clamp_index(value: f32, max: u32) -> u32 {
    if !(value > 0.0) {
        0
    } else if value >= max as f32 {
        max
    } else {
        value as u32
    }
}
