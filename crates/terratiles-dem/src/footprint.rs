//! Enumeration of the tiles that cover a projected region.

use crate::coord::{ProjectedBounds, TileCoord, MAX_ZOOM};
use crate::{mercator, DemError, Result};

/// Inclusive rectangle of tile indices at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    /// Zoom level.
    pub zoom: u8,
    /// Westernmost column.
    pub x_min: u32,
    /// Easternmost column.
    pub x_max: u32,
    /// Northernmost row.
    pub y_min: u32,
    /// Southernmost row.
    pub y_max: u32,
}

impl TileRange {
    /// Compute the tiles whose indices span `bounds` at `zoom`.
    ///
    /// The corners are converted to geographic coordinates and then to tile
    /// indices. Tile rows grow southward while latitude grows northward, so
    /// the two extremes of each axis are sorted after conversion.
    pub fn covering(bounds: &ProjectedBounds, zoom: u8) -> Result<Self> {
        if zoom > MAX_ZOOM {
            return Err(DemError::InvalidZoomLevel(zoom));
        }

        let (lat_a, lon_a) = mercator::to_geographic(bounds.min_x, bounds.min_y);
        let (lat_b, lon_b) = mercator::to_geographic(bounds.max_x, bounds.max_y);

        let a = TileCoord::from_lat_lon(lat_a, lon_a, zoom)?;
        let b = TileCoord::from_lat_lon(lat_b, lon_b, zoom)?;

        let (x_min, x_max) = sorted(a.x, b.x);
        let (y_min, y_max) = sorted(a.y, b.y);

        Ok(Self {
            zoom,
            x_min,
            x_max,
            y_min,
            y_max,
        })
    }

    /// Number of candidate tiles.
    pub fn tile_count(&self) -> u64 {
        (self.x_max - self.x_min + 1) as u64 * (self.y_max - self.y_min + 1) as u64
    }

    /// Iterate the tiles column by column. Each call starts afresh.
    pub fn iter(&self) -> TileRangeIter {
        TileRangeIter {
            range: *self,
            x: self.x_min,
            y: self.y_min,
            done: false,
        }
    }
}

impl IntoIterator for TileRange {
    type Item = TileCoord;
    type IntoIter = TileRangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`TileRange`].
#[derive(Debug, Clone)]
pub struct TileRangeIter {
    range: TileRange,
    x: u32,
    y: u32,
    done: bool,
}

impl Iterator for TileRangeIter {
    type Item = TileCoord;

    fn next(&mut self) -> Option<TileCoord> {
        if self.done {
            return None;
        }
        let coord = TileCoord {
            z: self.range.zoom,
            x: self.x,
            y: self.y,
        };

        if self.y < self.range.y_max {
            self.y += 1;
        } else if self.x < self.range.x_max {
            self.x += 1;
            self.y = self.range.y_min;
        } else {
            self.done = true;
        }

        Some(coord)
    }
}

/// One [`TileRange`] per zoom level in `min_zoom..=max_zoom`.
pub fn pyramid_ranges(bounds: &ProjectedBounds, min_zoom: u8, max_zoom: u8) -> Result<Vec<TileRange>> {
    if min_zoom > max_zoom {
        return Err(DemError::InvalidZoomRange {
            min: min_zoom,
            max: max_zoom,
        });
    }
    (min_zoom..=max_zoom)
        .map(|zoom| TileRange::covering(bounds, zoom))
        .collect()
}

fn sorted(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
