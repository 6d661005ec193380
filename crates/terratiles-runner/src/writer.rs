//! Tile output: per-tile outcomes and crash-safe file writes.

use crate::Phase;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use terratiles_dem::TileCoord;

/// Why a candidate tile produced no file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The tile footprint does not touch the mosaic.
    OutsideMosaic,
    /// Every resampled value was zero (nodata or outside).
    Empty,
    /// The tile file exists and `skip_existing` is set.
    AlreadyExists,
}

impl SkipReason {
    /// Metric label value.
    pub const fn as_label(&self) -> &'static str {
        match self {
            SkipReason::OutsideMosaic => "outside",
            SkipReason::Empty => "empty",
            SkipReason::AlreadyExists => "exists",
        }
    }
}

/// Result of processing one candidate tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOutcome {
    /// A PNG of `bytes` bytes was written.
    Written {
        /// File size.
        bytes: usize,
    },
    /// No file was produced.
    Skipped(SkipReason),
    /// The tile failed in the given phase.
    Failed(Phase),
}

/// Writes tiles under `{root}/{z}/{x}/{y}.png`.
#[derive(Debug, Clone)]
pub struct TileWriter {
    root: PathBuf,
}

impl TileWriter {
    /// Writer rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Pyramid root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of a tile.
    pub fn tile_path(&self, coord: &TileCoord) -> PathBuf {
        coord.tile_path(&self.root)
    }

    /// Whether the tile is already on disk.
    pub fn exists(&self, coord: &TileCoord) -> bool {
        self.tile_path(coord).is_file()
    }

    /// Write one tile, returning its size.
    ///
    /// Data goes to `{y}.png.tmp` first and is renamed into place, so a tile
    /// file is either complete or absent.
    pub fn write(&self, coord: &TileCoord, png: &[u8]) -> std::io::Result<usize> {
        let path = self.tile_path(coord);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("png.tmp");
        let result = write_file(&tmp, png).and_then(|()| fs::rename(&tmp, &path));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map(|()| png.len())
    }
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(data)?;
    out.flush()
}
