//! # terratiles-runner
//!
//! Builds Terrarium-encoded terrain tile pyramids for MapLibre `raster-dem`
//! sources from an elevation mosaic in Web Mercator.
//!
//! - [`PyramidConfig`]: YAML build configuration
//! - [`PyramidBuilder`]: parallel per-zoom tile generation
//! - [`TileWriter`]: `{root}/{z}/{x}/{y}.png` output
//! - [`PyramidManifest`]: the `bounds.json` written after the last zoom
//! - [`metrics_export::InMemoryRecorder`]: captures build metrics for export
//!
//! ## Example
//!
//! ```no_run
//! use terratiles_dem::ElevationMosaic;
//! use terratiles_runner::{CancelToken, PyramidBuilder, PyramidConfig};
//!
//! let mosaic = ElevationMosaic::from_geotiff("merged_3857.tif")?;
//! let config = PyramidConfig {
//!     output_dir: "public/terrain-tiles".into(),
//!     ..PyramidConfig::default()
//! };
//!
//! let summary = PyramidBuilder::new(config)?.run(&mosaic, &CancelToken::new())?;
//! println!("{} tiles", summary.tile_count);
//! # Ok::<(), terratiles_runner::PyramidError>(())
//! ```

pub mod config;
mod error;
pub mod manifest;
pub mod metrics_export;
pub mod pyramid;
pub mod writer;

pub use config::PyramidConfig;
pub use error::{Phase, PyramidError};
pub use manifest::{PyramidManifest, MANIFEST_FILE};
pub use pyramid::{CancelToken, PyramidBuilder, PyramidSummary, ZoomSummary};
pub use writer::{SkipReason, TileOutcome, TileWriter};

/// Result type for pyramid builds.
pub type Result<T> = std::result::Result<T, PyramidError>;
