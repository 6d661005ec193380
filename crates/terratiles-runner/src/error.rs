//! Error types for pyramid builds.

use std::fmt;
use std::path::PathBuf;
use terratiles_dem::DemError;
use thiserror::Error;

/// Stage of a build in which an error arose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Loading and validating inputs before any tile work.
    Configuration,
    /// Computing the candidate tiles of a zoom level.
    Enumeration,
    /// Sampling the mosaic for one tile.
    Resampling,
    /// Encoding or writing one tile.
    Serialization,
    /// Writing `bounds.json`.
    Manifest,
}

impl Phase {
    /// Lowercase name, also used as a metric label value.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Configuration => "configuration",
            Phase::Enumeration => "enumeration",
            Phase::Resampling => "resampling",
            Phase::Serialization => "serialization",
            Phase::Manifest => "manifest",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a pyramid build.
#[derive(Debug, Error)]
pub enum PyramidError {
    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`crate::PyramidConfig`].
    #[error("Invalid config YAML: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The mosaic could not be loaded or is unusable.
    #[error("Mosaic error: {0}")]
    Mosaic(#[from] DemError),

    /// The output directory could not be created.
    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The worker thread pool could not be started.
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Candidate tiles could not be computed for a zoom level.
    #[error("Zoom {zoom}: {source}")]
    Enumeration {
        /// Zoom level.
        zoom: u8,
        /// Underlying tile math error.
        #[source]
        source: DemError,
    },

    /// More tiles failed than the configured limit allows.
    #[error("{failures} tiles failed at zoom {zoom}, exceeding the limit of {limit}")]
    TooManyFailures {
        /// Phase the failures occurred in.
        phase: Phase,
        /// Zoom level being built when the limit was crossed.
        zoom: u8,
        /// Failures so far in the run.
        failures: usize,
        /// Configured limit.
        limit: usize,
    },

    /// `bounds.json` could not be written.
    #[error("Failed to write manifest {path}: {reason}")]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// The build was cancelled before completing.
    #[error("Build cancelled at zoom {zoom}; tiles already written are kept")]
    Cancelled {
        /// Zoom level being built when cancellation was observed.
        zoom: u8,
    },
}

impl PyramidError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        PyramidError::Config(message.into())
    }

    /// The phase that failed, or `None` for a cancelled build.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            PyramidError::Config(_)
            | PyramidError::ConfigRead { .. }
            | PyramidError::ConfigParse(_)
            | PyramidError::Mosaic(_)
            | PyramidError::OutputDir { .. }
            | PyramidError::ThreadPool(_) => Some(Phase::Configuration),
            PyramidError::Enumeration { .. } => Some(Phase::Enumeration),
            PyramidError::TooManyFailures { phase, .. } => Some(*phase),
            PyramidError::Manifest { .. } => Some(Phase::Manifest),
            PyramidError::Cancelled { .. } => None,
        }
    }
}
