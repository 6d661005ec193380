//! Build configuration.
//!
//! A [`PyramidConfig`] is usually loaded from YAML and then selectively
//! overridden from the command line:
//!
//! ```yaml
//! tile_size: 256
//! min_zoom: 10
//! max_zoom: 15
//! output_dir: public/terrain-tiles
//! search_bbox: [15.76, 56.59, 15.94, 56.71]
//! center: [15.85, 56.65]
//! skip_existing: false
//! threads: 8
//! max_write_failures: 8
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use crate::{PyramidError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use terratiles_dem::MAX_ZOOM;

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Largest accepted tile edge in pixels.
pub const MAX_TILE_SIZE: u32 = 4096;

/// Default lowest zoom level.
pub const DEFAULT_MIN_ZOOM: u8 = 10;

/// Default highest zoom level.
pub const DEFAULT_MAX_ZOOM: u8 = 15;

/// Default number of tolerated serialization failures.
pub const DEFAULT_MAX_WRITE_FAILURES: usize = 8;

/// Configuration for one pyramid build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PyramidConfig {
    /// Tile edge in pixels.
    pub tile_size: u32,
    /// Lowest zoom level built.
    pub min_zoom: u8,
    /// Highest zoom level built.
    pub max_zoom: u8,
    /// Root directory of the pyramid.
    pub output_dir: PathBuf,
    /// `[lon_min, lat_min, lon_max, lat_max]` recorded in the manifest.
    /// Defaults to the mosaic's geographic bounds.
    pub search_bbox: Option<[f64; 4]>,
    /// `[lon, lat]` recorded in the manifest. Defaults to the bbox centre.
    pub center: Option<[f64; 2]>,
    /// Leave tiles that already exist on disk untouched.
    pub skip_existing: bool,
    /// Worker threads. `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Serialization failures tolerated before the build aborts.
    pub max_write_failures: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            output_dir: PathBuf::from("terrain-tiles"),
            search_bbox: None,
            center: None,
            skip_existing: false,
            threads: None,
            max_write_failures: DEFAULT_MAX_WRITE_FAILURES,
        }
    }
}

impl PyramidConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| PyramidError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(PyramidError::config(format!(
                "tile_size {} must be between 1 and {}",
                self.tile_size, MAX_TILE_SIZE
            )));
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(PyramidError::config(format!(
                "max_zoom {} exceeds {}",
                self.max_zoom, MAX_ZOOM
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(PyramidError::config(format!(
                "min_zoom {} is greater than max_zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.threads == Some(0) {
            return Err(PyramidError::config("threads must be at least 1"));
        }
        if let Some([lon_min, lat_min, lon_max, lat_max]) = self.search_bbox {
            if !valid_lon_lat(lon_min, lat_min) || !valid_lon_lat(lon_max, lat_max) {
                return Err(PyramidError::config(format!(
                    "search_bbox {:?} is outside lon [-180, 180], lat [-90, 90]",
                    [lon_min, lat_min, lon_max, lat_max]
                )));
            }
            if lon_min > lon_max || lat_min > lat_max {
                return Err(PyramidError::config(format!(
                    "search_bbox {:?} must be [lon_min, lat_min, lon_max, lat_max]",
                    [lon_min, lat_min, lon_max, lat_max]
                )));
            }
        }
        if let Some([lon, lat]) = self.center {
            if !valid_lon_lat(lon, lat) {
                return Err(PyramidError::config(format!(
                    "center [{}, {}] is outside lon [-180, 180], lat [-90, 90]",
                    lon, lat
                )));
            }
        }
        Ok(())
    }

    /// The manifest bbox, falling back to `mosaic_bounds`.
    pub fn resolve_bbox(&self, mosaic_bounds: [f64; 4]) -> [f64; 4] {
        self.search_bbox.unwrap_or(mosaic_bounds)
    }

    /// The manifest centre, falling back to the middle of `bbox`.
    pub fn resolve_center(&self, bbox: [f64; 4]) -> [f64; 2] {
        self.center
            .unwrap_or([(bbox[0] + bbox[2]) / 2.0, (bbox[1] + bbox[3]) / 2.0])
    }
}

fn valid_lon_lat(lon: f64, lat: f64) -> bool {
    (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat)
}
