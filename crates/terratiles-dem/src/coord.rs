//! Slippy-map tile coordinates and their Web Mercator footprints.
//!
//! Uses the OpenStreetMap Slippy Map tile naming convention:
//! - `z` is the zoom level (0-30)
//! - `x` is the column (0 to 2^z - 1, from west to east)
//! - `y` is the row (0 to 2^z - 1, from north to south)

use crate::mercator::{self, WORLD_HALF_EXTENT};
use crate::{DemError, Result};
use std::f64::consts::PI;
use std::fmt;
use std::path::{Path, PathBuf};

/// Maximum valid zoom level.
pub const MAX_ZOOM: u8 = 30;

/// Latitude clamp applied before the tile formula, which is undefined at the poles.
const LAT_CLAMP: f64 = 85.0511;

/// File extension of written tiles.
pub const TILE_EXTENSION: &str = "png";

/// Axis-aligned rectangle in the Web Mercator plane, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedBounds {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

impl ProjectedBounds {
    /// Create bounds from two corners, in any order.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: max_x.max(min_x),
            max_y: max_y.max(min_y),
        }
    }

    /// Width in meters.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in meters.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check whether two rectangles overlap. Touching edges count.
    pub fn intersects(&self, other: &ProjectedBounds) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    /// Convert to geographic bounds.
    ///
    /// Returns `[lon_min, lat_min, lon_max, lat_max]`.
    pub fn to_geographic(&self) -> [f64; 4] {
        let (lat_min, lon_min) = mercator::to_geographic(self.min_x, self.min_y);
        let (lat_max, lon_max) = mercator::to_geographic(self.max_x, self.max_y);
        [lon_min, lat_min, lon_max, lat_max]
    }
}

/// OSM-style tile coordinates (z, x, y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Zoom level (0-30).
    pub z: u8,
    /// X coordinate (column, 0 at 180°W, increases eastward).
    pub x: u32,
    /// Y coordinate (row, 0 at ~85.05°N, increases southward).
    pub y: u32,
}

impl TileCoord {
    /// Create a new tile coordinate.
    ///
    /// # Panics
    /// Panics if the zoom is above [`MAX_ZOOM`] or the coordinates are out of
    /// range for the zoom level.
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        assert!(z <= MAX_ZOOM, "zoom {} out of range", z);
        let max_coord = 1u64 << z;
        assert!((x as u64) < max_coord, "x={} out of range for zoom {}", x, z);
        assert!((y as u64) < max_coord, "y={} out of range for zoom {}", y, z);
        Self { z, x, y }
    }

    /// Number of tiles along one axis at a zoom level.
    pub fn tiles_per_axis(z: u8) -> u32 {
        1u32 << z
    }

    /// Convert latitude/longitude to tile coordinates.
    ///
    /// Uses the OpenStreetMap Slippy Map tiling formula:
    /// - x = floor((lon + 180) / 360 * 2^z)
    /// - y = floor((1 - ln(tan(lat) + sec(lat)) / π) / 2 * 2^z)
    ///
    /// # Arguments
    /// * `lat` - Latitude in degrees, clamped to ±85.0511
    /// * `lon` - Longitude in degrees (-180 to 180)
    /// * `z` - Zoom level (0-30)
    pub fn from_lat_lon(lat: f64, lon: f64, z: u8) -> Result<Self> {
        if z > MAX_ZOOM {
            return Err(DemError::InvalidZoomLevel(z));
        }

        let lat_clamped = lat.clamp(-LAT_CLAMP, LAT_CLAMP);
        let n = Self::tiles_per_axis(z) as f64;

        let x = ((lon + 180.0) / 360.0 * n).floor();

        let lat_rad = lat_clamped.to_radians();
        let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor();

        // Clamp to valid range (handles edge cases at exactly ±180°)
        let max_coord = (Self::tiles_per_axis(z) - 1) as f64;
        let x = x.clamp(0.0, max_coord) as u32;
        let y = y.clamp(0.0, max_coord) as u32;

        Ok(Self { z, x, y })
    }

    /// Edge length of a tile at a zoom level, in projected meters.
    pub fn edge_length(z: u8) -> f64 {
        2.0 * WORLD_HALF_EXTENT / Self::tiles_per_axis(z) as f64
    }

    /// Get the footprint of this tile in the Web Mercator plane.
    pub fn projected_bounds(&self) -> ProjectedBounds {
        let edge = Self::edge_length(self.z);
        let min_x = -WORLD_HALF_EXTENT + self.x as f64 * edge;
        let max_y = WORLD_HALF_EXTENT - self.y as f64 * edge;
        ProjectedBounds {
            min_x,
            min_y: max_y - edge,
            max_x: min_x + edge,
            max_y,
        }
    }

    /// Get the output file path for this tile under `root`.
    pub fn tile_path(&self, root: &Path) -> PathBuf {
        root.join(self.z.to_string())
            .join(self.x.to_string())
            .join(format!("{}.{}", self.y, TILE_EXTENSION))
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
