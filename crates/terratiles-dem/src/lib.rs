//! # terratiles-dem
//!
//! Elevation mosaic access and Web Mercator tile geometry for building
//! terrain tile pyramids.
//!
//! This crate provides:
//! - An [`ElevationMosaic`] loaded from a single-band GeoTIFF (or built from
//!   raw samples) that has already been merged and reprojected to EPSG:3857
//! - Slippy-map [`TileCoord`] math and projected tile footprints
//! - [`TileRange`] enumeration of the tiles covering a mosaic per zoom level
//! - Bilinear [`resample_tile`] of a mosaic onto a tile's pixel grid
//!
//! ## Tile Coordinate System
//!
//! Tiles follow the OpenStreetMap convention: `x` grows eastward from 180°W,
//! `y` grows southward from ~85.05°N, and zoom `z` has `2^z` tiles per axis.
//! A tile's footprint spans `2 · 20037508.342789244 / 2^z` meters.
//!
//! ## Example
//!
//! ```no_run
//! use terratiles_dem::{resample_tile, ElevationMosaic, TileRange};
//!
//! let mosaic = ElevationMosaic::from_geotiff("merged_3857.tif")?;
//! let range = TileRange::covering(&mosaic.projected_bounds(), 12)?;
//!
//! for tile in range.iter() {
//!     let grid = resample_tile(&mosaic, &tile.projected_bounds(), 256)?;
//!     if !grid.is_empty() {
//!         println!("{} has data", tile);
//!     }
//! }
//! # Ok::<(), terratiles_dem::DemError>(())
//! ```

mod coord;
mod error;
mod footprint;
pub mod mercator;
mod mosaic;
mod resample;
mod transform;

pub use coord::{ProjectedBounds, TileCoord, MAX_ZOOM, TILE_EXTENSION};
pub use error::DemError;
pub use footprint::{pyramid_ranges, TileRange, TileRangeIter};
pub use mosaic::{Crs, ElevationMosaic};
pub use resample::{resample_tile, ElevationGrid, ElevationSource};
pub use transform::{GeoTransform, InverseTransform};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
