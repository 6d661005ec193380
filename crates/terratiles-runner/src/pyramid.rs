//! Pyramid orchestration.
//!
//! A build runs zoom level by zoom level. Within a level the candidate tiles
//! are processed in parallel on a rayon pool; each tile is resampled from
//! the mosaic, skipped if empty, encoded as Terrarium RGB, serialized to PNG
//! and written. The manifest is written only after every level finishes.
//!
//! ```text
//! per zoom:  enumerate ─► per tile: resample ─► skip if empty ─► encode ─► serialize ─► write
//! finally:   bounds.json
//! ```

use crate::manifest::PyramidManifest;
use crate::writer::{SkipReason, TileOutcome, TileWriter};
use crate::{Phase, PyramidConfig, PyramidError, Result};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use terratiles_codec::{encode_grid, encode_png};
use terratiles_dem::{
    pyramid_ranges, resample_tile, DemError, ElevationSource, ProjectedBounds, TileCoord, TileRange,
};
use terratiles_metrics::{metric_defs, ZoomLabels};
use tracing::{debug, info, warn};

/// Shared flag that asks a running build to stop.
///
/// Checked before each tile and at every zoom boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-zoom tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoomSummary {
    /// Zoom level.
    pub zoom: u8,
    /// Candidate tiles from the enumerator.
    pub candidates: u64,
    /// Tiles written.
    pub written: usize,
    /// Tiles with no data.
    pub empty: usize,
    /// Candidates outside the mosaic.
    pub outside: usize,
    /// Tiles left in place because they existed.
    pub existing: usize,
    /// Tiles that failed.
    pub failed: usize,
    /// Bytes written.
    pub bytes: u64,
}

impl ZoomSummary {
    fn new(zoom: u8, candidates: u64) -> Self {
        Self {
            zoom,
            candidates,
            ..Self::default()
        }
    }

    fn record(mut self, outcome: TileOutcome) -> Self {
        match outcome {
            TileOutcome::Written { bytes } => {
                self.written += 1;
                self.bytes += bytes as u64;
            }
            TileOutcome::Skipped(SkipReason::Empty) => self.empty += 1,
            TileOutcome::Skipped(SkipReason::OutsideMosaic) => self.outside += 1,
            TileOutcome::Skipped(SkipReason::AlreadyExists) => self.existing += 1,
            TileOutcome::Failed(_) => self.failed += 1,
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.written += other.written;
        self.empty += other.empty;
        self.outside += other.outside;
        self.existing += other.existing;
        self.failed += other.failed;
        self.bytes += other.bytes;
        self
    }

    /// Tiles present on disk for this zoom after the build.
    pub fn present(&self) -> usize {
        self.written + self.existing
    }
}

/// Result of a completed build.
#[derive(Debug, Clone)]
pub struct PyramidSummary {
    /// One entry per zoom level, lowest first.
    pub zooms: Vec<ZoomSummary>,
    /// Tiles in the pyramid (written plus already existing).
    pub tile_count: u64,
    /// Bytes written by this run.
    pub total_bytes: u64,
    /// The manifest written at the end.
    pub manifest: PyramidManifest,
    /// Where the manifest was written.
    pub manifest_path: PathBuf,
    /// Wall-clock duration of the build.
    pub elapsed: Duration,
}

impl PyramidSummary {
    /// Tiles that failed across all zoom levels.
    pub fn failed(&self) -> usize {
        self.zooms.iter().map(|z| z.failed).sum()
    }
}

/// Run-wide state shared with the workers by reference.
struct RunState<'a> {
    cancel: &'a CancelToken,
    /// Tiles present in the pyramid so far.
    tile_counter: AtomicUsize,
    /// Serialization failures so far.
    write_failures: AtomicUsize,
    /// Set once `write_failures` exceeds the limit.
    aborted: AtomicBool,
}

impl RunState<'_> {
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.aborted.load(Ordering::Relaxed)
    }
}

/// Builds a Terrarium tile pyramid from an elevation source.
#[derive(Debug, Clone)]
pub struct PyramidBuilder {
    config: PyramidConfig,
    writer: TileWriter,
}

impl PyramidBuilder {
    /// Validate `config` and prepare a builder.
    pub fn new(config: PyramidConfig) -> Result<Self> {
        config.validate()?;
        let writer = TileWriter::new(config.output_dir.clone());
        Ok(Self { config, writer })
    }

    /// The validated configuration.
    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    /// Candidate tile ranges per zoom level, without writing anything.
    pub fn plan<S: ElevationSource + ?Sized>(&self, mosaic: &S) -> Result<Vec<TileRange>> {
        let bounds = source_bounds(mosaic)?;
        pyramid_ranges(&bounds, self.config.min_zoom, self.config.max_zoom).map_err(|source| {
            PyramidError::Enumeration {
                zoom: self.config.min_zoom,
                source,
            }
        })
    }

    /// Build every zoom level and write the manifest.
    pub fn run<S: ElevationSource + ?Sized>(
        &self,
        mosaic: &S,
        cancel: &CancelToken,
    ) -> Result<PyramidSummary> {
        let start = Instant::now();
        let bounds = source_bounds(mosaic)?;
        let root = self.writer.root();
        std::fs::create_dir_all(root).map_err(|source| PyramidError::OutputDir {
            path: root.to_path_buf(),
            source,
        })?;

        let pool = match self.config.threads {
            Some(n) => Some(rayon::ThreadPoolBuilder::new().num_threads(n).build()?),
            None => None,
        };

        let state = RunState {
            cancel,
            tile_counter: AtomicUsize::new(0),
            write_failures: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        };

        info!(
            "Building zoom {}-{} at {}px into {}",
            self.config.min_zoom,
            self.config.max_zoom,
            self.config.tile_size,
            root.display()
        );

        let mut zooms = Vec::new();
        for zoom in self.config.min_zoom..=self.config.max_zoom {
            if cancel.is_cancelled() {
                return Err(PyramidError::Cancelled { zoom });
            }

            let range = TileRange::covering(&bounds, zoom)
                .map_err(|source| PyramidError::Enumeration { zoom, source })?;
            let summary = match &pool {
                Some(pool) => pool.install(|| self.build_zoom(mosaic, &bounds, range, &state)),
                None => self.build_zoom(mosaic, &bounds, range, &state),
            };

            if state.aborted.load(Ordering::Relaxed) {
                return Err(PyramidError::TooManyFailures {
                    phase: Phase::Serialization,
                    zoom,
                    failures: state.write_failures.load(Ordering::Relaxed),
                    limit: self.config.max_write_failures,
                });
            }
            if cancel.is_cancelled() {
                return Err(PyramidError::Cancelled { zoom });
            }

            info!(
                "Zoom {}: {} written, {} empty, {} outside, {} existing, {} failed ({} candidates, {:.1} KB)",
                zoom,
                summary.written,
                summary.empty,
                summary.outside,
                summary.existing,
                summary.failed,
                summary.candidates,
                summary.bytes as f64 / 1024.0
            );
            zooms.push(summary);
        }

        let tile_count = state.tile_counter.load(Ordering::SeqCst) as u64;
        let bbox = self.config.resolve_bbox(bounds.to_geographic());
        let center = self.config.resolve_center(bbox);
        let manifest = PyramidManifest::new(
            center,
            bbox,
            self.config.min_zoom,
            self.config.max_zoom,
            tile_count,
        );
        let manifest_path = manifest.write(root)?;

        let total_bytes = zooms.iter().map(|z| z.bytes).sum();
        info!(
            "Done: {} tiles, {:.1} MB in {:.1}s",
            tile_count,
            total_bytes as f64 / 1_048_576.0,
            start.elapsed().as_secs_f64()
        );

        Ok(PyramidSummary {
            zooms,
            tile_count,
            total_bytes,
            manifest,
            manifest_path,
            elapsed: start.elapsed(),
        })
    }

    fn build_zoom<S: ElevationSource + ?Sized>(
        &self,
        mosaic: &S,
        bounds: &ProjectedBounds,
        range: TileRange,
        state: &RunState<'_>,
    ) -> ZoomSummary {
        let zoom = range.zoom;
        let candidates = range.tile_count();
        metrics::gauge!(metric_defs::ZOOM_CANDIDATES.name, &ZoomLabels::new(zoom).to_labels())
            .set(candidates as f64);
        debug!(
            "Zoom {}: tiles x={}-{}, y={}-{} ({} candidates)",
            zoom, range.x_min, range.x_max, range.y_min, range.y_max, candidates
        );

        range
            .iter()
            .par_bridge()
            .filter_map(|coord| {
                if state.should_stop() {
                    return None;
                }
                let outcome = self.process_tile(mosaic, bounds, &coord);
                self.account(&coord, outcome, state);
                Some(outcome)
            })
            .fold(
                || ZoomSummary::new(zoom, candidates),
                ZoomSummary::record,
            )
            .reduce(|| ZoomSummary::new(zoom, candidates), ZoomSummary::merge)
    }

    fn process_tile<S: ElevationSource + ?Sized>(
        &self,
        mosaic: &S,
        bounds: &ProjectedBounds,
        coord: &TileCoord,
    ) -> TileOutcome {
        let footprint = coord.projected_bounds();
        if !footprint.intersects(bounds) {
            return TileOutcome::Skipped(SkipReason::OutsideMosaic);
        }
        if self.config.skip_existing && self.writer.exists(coord) {
            return TileOutcome::Skipped(SkipReason::AlreadyExists);
        }

        let start = Instant::now();
        let edge = self.config.tile_size;
        let grid = match resample_tile(mosaic, &footprint, edge) {
            Ok(grid) => grid,
            Err(e) => {
                warn!("Tile {}: resampling failed: {}", coord, e);
                return TileOutcome::Failed(Phase::Resampling);
            }
        };
        if grid.is_empty() {
            return TileOutcome::Skipped(SkipReason::Empty);
        }

        let pixels = encode_grid(grid.samples(), edge, edge);
        let outcome = match encode_png(&pixels) {
            Ok(png) => match self.writer.write(coord, &png) {
                Ok(bytes) => {
                    debug!("Tile {}: {} bytes", coord, bytes);
                    TileOutcome::Written { bytes }
                }
                Err(e) => {
                    warn!("Tile {}: write failed: {}", coord, e);
                    TileOutcome::Failed(Phase::Serialization)
                }
            },
            Err(e) => {
                warn!("Tile {}: PNG encoding failed: {}", coord, e);
                TileOutcome::Failed(Phase::Serialization)
            }
        };

        metrics::histogram!(
            metric_defs::TILE_PROCESS_TIME.name,
            &ZoomLabels::new(coord.z).to_labels()
        )
        .record(start.elapsed().as_micros() as f64);
        outcome
    }

    /// Update counters and metrics for one outcome.
    fn account(&self, coord: &TileCoord, outcome: TileOutcome, state: &RunState<'_>) {
        let labels = ZoomLabels::new(coord.z);
        match outcome {
            TileOutcome::Written { bytes } => {
                state.tile_counter.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(metric_defs::TILES_WRITTEN.name, &labels.to_labels()).increment(1);
                metrics::histogram!(metric_defs::TILE_SIZE.name, &labels.to_labels())
                    .record(bytes as f64);
            }
            TileOutcome::Skipped(reason) => {
                if reason == SkipReason::AlreadyExists {
                    state.tile_counter.fetch_add(1, Ordering::Relaxed);
                }
                let labels = labels.with(&[("reason", reason.as_label().to_string())]);
                metrics::counter!(metric_defs::TILES_SKIPPED.name, &labels).increment(1);
            }
            TileOutcome::Failed(phase) => {
                let labels = labels.with(&[("phase", phase.as_str().to_string())]);
                metrics::counter!(metric_defs::TILES_FAILED.name, &labels).increment(1);
                if phase == Phase::Serialization {
                    let failures = state.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if failures > self.config.max_write_failures {
                        state.aborted.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

/// Projected footprint of a source raster.
///
/// Fails for an empty raster or a transform that cannot be inverted, so
/// such sources are rejected before any tile work.
fn source_bounds<S: ElevationSource + ?Sized>(mosaic: &S) -> Result<ProjectedBounds> {
    let (width, height) = mosaic.dimensions();
    if width == 0 || height == 0 {
        return Err(DemError::InvalidMosaic(format!(
            "{}x{} raster has no samples",
            width, height
        ))
        .into());
    }
    mosaic.transform().validate()?;
    Ok(mosaic.transform().bounds(width, height))
}
