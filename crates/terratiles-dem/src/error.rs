//! Error types for the DEM crate.

use thiserror::Error;

/// Errors that can occur when working with elevation mosaics and tile math.
#[derive(Debug, Error)]
pub enum DemError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or malformed georeferencing tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Unsupported data type in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// The affine transform cannot be inverted or has a zero pixel extent.
    #[error("Degenerate geotransform: {0}")]
    DegenerateTransform(String),

    /// Mosaic dimensions or sample buffer are inconsistent.
    #[error("Invalid mosaic: {0}")]
    InvalidMosaic(String),

    /// Mosaic is not in the Web Mercator plane.
    #[error("Unsupported CRS {0}: the mosaic must be reprojected to EPSG:3857 first")]
    UnsupportedCrs(String),

    /// Invalid zoom level.
    #[error("Invalid zoom level {0} (must be 0-30)")]
    InvalidZoomLevel(u8),

    /// Zoom range with the lower bound above the upper bound.
    #[error("Invalid zoom range {min}-{max} (min must not exceed max)")]
    InvalidZoomRange {
        /// Lowest requested zoom.
        min: u8,
        /// Highest requested zoom.
        max: u8,
    },

    /// Invalid tile edge length.
    #[error("Invalid tile size {0} (must be at least 1)")]
    InvalidTileSize(u32),

    /// Reading a sample from the elevation source failed.
    #[error("Failed to read sample at column {col}, row {row}: {reason}")]
    SampleRead {
        /// Mosaic column.
        col: usize,
        /// Mosaic row.
        row: usize,
        /// Reason for failure.
        reason: String,
    },
}
