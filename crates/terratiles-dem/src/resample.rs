//! Bilinear resampling of an elevation source onto a tile's pixel grid.
//!
//! Each output pixel centre is projected into the Web Mercator plane using
//! a transform stretched over the tile footprint, then mapped back through
//! the inverse source transform to fractional source pixel coordinates.
//!
//! The four surrounding source pixel centres are blended bilinearly.
//! Outside the source extent, or when any contributing neighbour is nodata,
//! the sample is exactly `0.0`.

use crate::coord::ProjectedBounds;
use crate::transform::GeoTransform;
use crate::{DemError, Result};

/// Read access to a georeferenced elevation raster.
///
/// Implementations must be shareable across the worker threads that
/// resample independent tiles.
pub trait ElevationSource: Sync {
    /// Raster dimensions `(width, height)`.
    fn dimensions(&self) -> (usize, usize);

    /// Pixel to projected transform.
    fn transform(&self) -> &GeoTransform;

    /// Read one sample. `Ok(None)` marks nodata.
    fn sample(&self, col: usize, row: usize) -> Result<Option<f32>>;
}

/// A square grid of elevation samples for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    /// Edge length in pixels.
    edge: usize,
    /// Samples in row-major order (north to south, west to east).
    data: Vec<f32>,
}

impl ElevationGrid {
    /// Edge length in pixels.
    pub fn edge(&self) -> usize {
        self.edge
    }

    /// Sample at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.edge + col]
    }

    /// All samples in row-major order.
    pub fn samples(&self) -> &[f32] {
        &self.data
    }

    /// True when no sample differs from exactly `0.0`.
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0)
    }
}

/// Resample `source` over a tile `footprint` into an `edge × edge` grid.
pub fn resample_tile<S: ElevationSource + ?Sized>(
    source: &S,
    footprint: &ProjectedBounds,
    edge: u32,
) -> Result<ElevationGrid> {
    if edge == 0 {
        return Err(DemError::InvalidTileSize(edge));
    }

    let (width, height) = source.dimensions();
    let inverse = source.transform().invert()?;
    let tile_transform = GeoTransform::from_bounds(footprint, edge, edge);

    let edge = edge as usize;
    let mut data = Vec::with_capacity(edge * edge);

    for r in 0..edge {
        for c in 0..edge {
            let (x, y) = tile_transform.apply(c as f64 + 0.5, r as f64 + 0.5);
            let (col, row) = inverse.apply(x, y);
            data.push(bilinear(source, width, height, col, row)?);
        }
    }

    Ok(ElevationGrid { edge, data })
}

/// Interpolate at fractional pixel-corner coordinates `(col, row)`.
fn bilinear<S: ElevationSource + ?Sized>(
    source: &S,
    width: usize,
    height: usize,
    col: f64,
    row: f64,
) -> Result<f32> {
    if !(col >= 0.0 && row >= 0.0 && col < width as f64 && row < height as f64) {
        return Ok(0.0);
    }

    // Shift to pixel-centre space
    let u = col - 0.5;
    let v = row - 0.5;
    let fx = u - u.floor();
    let fy = v - v.floor();

    let clamp_col = |i: f64| (i.max(0.0) as usize).min(width - 1);
    let clamp_row = |i: f64| (i.max(0.0) as usize).min(height - 1);
    let x0 = clamp_col(u.floor());
    let x1 = clamp_col(u.floor() + 1.0);
    let y0 = clamp_row(v.floor());
    let y1 = clamp_row(v.floor() + 1.0);

    let neighbours = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x1, y0, fx * (1.0 - fy)),
        (x0, y1, (1.0 - fx) * fy),
        (x1, y1, fx * fy),
    ];

    let mut elevation = 0.0f64;
    for (x, y, weight) in neighbours {
        if weight == 0.0 {
            continue;
        }
        match source.sample(x, y)? {
            Some(value) => elevation += value as f64 * weight,
            None => return Ok(0.0),
        }
    }

    Ok(elevation as f32)
}
