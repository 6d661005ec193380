//! Metric declarations for terrain tile pyramid builds.
//!
//! Every metric emitted during a build is declared once in [`metric_defs`]
//! as a [`Metric`] constant carrying its name, kind, unit and label keys.
//! The `metrics` crate is re-exported so callers emit against the same
//! facade version.
//!
//! Nothing is recorded unless the embedding application installs a
//! recorder; the calls are no-ops otherwise.
//!
//! # Example
//!
//! ```rust
//! use terratiles_metrics::{metric_defs, ZoomLabels};
//!
//! let labels = ZoomLabels::new(14);
//! metrics::counter!(metric_defs::TILES_WRITTEN.name, &labels.to_labels()).increment(1);
//!
//! let skipped = labels.with(&[("reason", "empty".to_string())]);
//! metrics::counter!(metric_defs::TILES_SKIPPED.name, &skipped).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use terratiles_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const BYTES_OUT: Metric = Metric::counter("terratiles.bytes_out")
///     .with_description("Bytes written")
///     .with_unit(Unit::Bytes)
///     .with_labels(&["zoom"]);
///
/// assert_eq!(BYTES_OUT.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "terratiles.tiles.written").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for pyramid builds.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Label Keys
    // ========================================================================

    /// Label present on every build metric.
    pub const ZOOM_LABELS: &[&str] = &["zoom"];

    /// Labels for skipped tiles.
    pub const SKIP_LABELS: &[&str] = &["zoom", "reason"];

    /// Labels for failed tiles.
    pub const FAILURE_LABELS: &[&str] = &["zoom", "phase"];

    // ========================================================================
    // Tile Metrics
    // ========================================================================

    /// Tiles encoded and written to disk.
    pub const TILES_WRITTEN: Metric = Metric::counter("terratiles.tiles.written")
        .with_description("Tiles encoded and written to disk")
        .with_unit(Unit::Count)
        .with_labels(ZOOM_LABELS);

    /// Candidate tiles that produced no output.
    ///
    /// Use `reason=outside|empty|exists` to tell the skip paths apart.
    pub const TILES_SKIPPED: Metric = Metric::counter("terratiles.tiles.skipped")
        .with_description("Candidate tiles skipped without writing")
        .with_unit(Unit::Count)
        .with_labels(SKIP_LABELS);

    /// Tiles that failed during resampling or serialization.
    pub const TILES_FAILED: Metric = Metric::counter("terratiles.tiles.failed")
        .with_description("Tiles that failed to resample or serialize")
        .with_unit(Unit::Count)
        .with_labels(FAILURE_LABELS);

    /// Encoded PNG size of each written tile.
    pub const TILE_SIZE: Metric = Metric::histogram("terratiles.tile.size_bytes")
        .with_description("Encoded PNG size per written tile")
        .with_unit(Unit::Bytes)
        .with_labels(ZOOM_LABELS);

    /// Wall-clock time spent on one tile, from resampling to rename.
    pub const TILE_PROCESS_TIME: Metric = Metric::histogram("terratiles.tile.process_time_us")
        .with_description("Time to resample, encode and write one tile")
        .with_unit(Unit::Microseconds)
        .with_labels(ZOOM_LABELS);

    // ========================================================================
    // Zoom Metrics
    // ========================================================================

    /// Candidate tiles enumerated for a zoom level.
    pub const ZOOM_CANDIDATES: Metric = Metric::gauge("terratiles.zoom.candidates")
        .with_description("Candidate tiles enumerated for the zoom level")
        .with_unit(Unit::Count)
        .with_labels(ZOOM_LABELS);

    /// Every declared metric.
    pub const ALL: &[&Metric] = &[
        &TILES_WRITTEN,
        &TILES_SKIPPED,
        &TILES_FAILED,
        &TILE_SIZE,
        &TILE_PROCESS_TIME,
        &ZOOM_CANDIDATES,
    ];
}

/// Labels shared by all metrics emitted while building one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomLabels {
    /// Zoom level being built.
    pub zoom: u8,
}

impl ZoomLabels {
    /// Labels for `zoom`.
    pub fn new(zoom: u8) -> Self {
        Self { zoom }
    }

    /// Converts to a label vector for the metrics macros.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("zoom", self.zoom.to_string())]
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all build metrics.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
