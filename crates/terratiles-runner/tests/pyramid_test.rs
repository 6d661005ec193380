//! End-to-end pyramid builds into scratch directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use terratiles_codec::{decode_png, read_header, ImageHeader};
use terratiles_dem::{
    mercator, Crs, DemError, ElevationMosaic, ElevationSource, GeoTransform, TileCoord,
};
use terratiles_runner::{
    CancelToken, Phase, PyramidBuilder, PyramidConfig, PyramidError, PyramidManifest,
};

/// 2×2 mosaic of 10 m with its north-west corner at the projection origin.
fn flat_square() -> ElevationMosaic {
    ElevationMosaic::new(
        vec![10.0; 4],
        2,
        2,
        GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
        Crs::WEB_MERCATOR,
        None,
    )
    .unwrap()
}

/// A 64×64 mosaic with 30 m pixels over Kalmar, sloping west to east.
fn kalmar_slope(nodata: Option<f32>) -> ElevationMosaic {
    let (x, y) = mercator::from_geographic(56.66, 16.36);
    let data = (0..64 * 64).map(|i| 2.0 + (i % 64) as f32 * 0.5).collect();
    ElevationMosaic::new(
        data,
        64,
        64,
        GeoTransform::north_up(x, y, 30.0, -30.0),
        Crs::WEB_MERCATOR,
        nodata,
    )
    .unwrap()
}

fn config(dir: &Path, min_zoom: u8, max_zoom: u8, tile_size: u32) -> PyramidConfig {
    PyramidConfig {
        tile_size,
        min_zoom,
        max_zoom,
        output_dir: dir.to_path_buf(),
        ..PyramidConfig::default()
    }
}

fn files_with_extension(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == extension) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

fn png_files(root: &Path) -> Vec<PathBuf> {
    files_with_extension(root, "png")
}

#[test]
fn test_single_tile_at_zoom_24() {
    let dir = tempfile::tempdir().unwrap();
    let builder = PyramidBuilder::new(config(dir.path(), 24, 24, 2)).unwrap();

    let summary = builder.run(&flat_square(), &CancelToken::new()).unwrap();

    assert_eq!(summary.tile_count, 1);
    assert_eq!(summary.zooms.len(), 1);
    assert_eq!(summary.zooms[0].candidates, 1);
    assert_eq!(summary.zooms[0].written, 1);

    let tile = dir.path().join("24").join("8388608").join("8388608.png");
    assert_eq!(png_files(dir.path()), vec![tile.clone()]);

    let png = fs::read(&tile).unwrap();
    assert_eq!(summary.total_bytes, png.len() as u64);
    assert_eq!(read_header(&png).unwrap(), ImageHeader::rgb(2, 2));
    let pixels = decode_png(&png).unwrap();
    for row in 0..2 {
        for col in 0..2 {
            assert_eq!(pixels.pixel(row, col), [128, 10, 0]);
        }
    }

    let manifest = PyramidManifest::read(&dir.path().join("bounds.json")).unwrap();
    assert_eq!(manifest, summary.manifest);
    assert_eq!(manifest.tile_count, 1);
    assert_eq!((manifest.min_zoom, manifest.max_zoom), (24, 24));
    assert_eq!(manifest.encoding, "terrarium");
}

#[test]
fn test_all_nodata_writes_no_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let (x, y) = mercator::from_geographic(56.66, 16.36);
    let mosaic = ElevationMosaic::new(
        vec![-9999.0; 16 * 16],
        16,
        16,
        GeoTransform::north_up(x, y, 30.0, -30.0),
        Crs::WEB_MERCATOR,
        Some(-9999.0),
    )
    .unwrap();

    let builder = PyramidBuilder::new(config(dir.path(), 10, 13, 16)).unwrap();
    let summary = builder.run(&mosaic, &CancelToken::new()).unwrap();

    assert_eq!(summary.tile_count, 0);
    assert!(png_files(dir.path()).is_empty());
    for zoom in &summary.zooms {
        assert_eq!(zoom.written, 0);
        assert_eq!(zoom.empty + zoom.outside, zoom.candidates as usize);
    }
    let manifest = PyramidManifest::read(&summary.manifest_path).unwrap();
    assert_eq!(manifest.tile_count, 0);
}

#[test]
fn test_multi_zoom_layout_and_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let mosaic = kalmar_slope(None);
    let mut cfg = config(dir.path(), 11, 14, 64);
    cfg.threads = Some(2);
    let builder = PyramidBuilder::new(cfg).unwrap();

    let summary = builder.run(&mosaic, &CancelToken::new()).unwrap();

    let files = png_files(dir.path());
    assert_eq!(files.len() as u64, summary.tile_count);
    assert!(summary.zooms.iter().all(|z| z.written >= 1));
    assert_eq!(summary.failed(), 0);

    for path in &files {
        // {root}/{z}/{x}/{y}.png with the tile inside the enumerated range
        let rel: Vec<u32> = path
            .strip_prefix(dir.path())
            .unwrap()
            .with_extension("")
            .iter()
            .map(|c| c.to_str().unwrap().parse().unwrap())
            .collect();
        assert_eq!(rel.len(), 3);
        let coord = TileCoord::new(rel[0] as u8, rel[1], rel[2]);
        assert!(coord.projected_bounds().intersects(&mosaic.projected_bounds()));
        assert!(read_header(&fs::read(path).unwrap()).unwrap().is_truecolor8());
    }

    let manifest = PyramidManifest::read(&summary.manifest_path).unwrap();
    let [lon_min, lat_min, lon_max, lat_max] = mosaic.geographic_bounds();
    assert_eq!(manifest.bbox, [lon_min, lat_min, lon_max, lat_max]);
    assert_eq!(
        manifest.center,
        [(lon_min + lon_max) / 2.0, (lat_min + lat_max) / 2.0]
    );
    assert_eq!(manifest.tile_count, files.len() as u64);
}

#[test]
fn test_manifest_uses_configured_bbox_and_center() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), 24, 24, 2);
    cfg.search_bbox = Some([15.76, 56.59, 15.94, 56.71]);
    cfg.center = Some([15.85, 56.65]);

    let summary = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&flat_square(), &CancelToken::new())
        .unwrap();

    assert_eq!(summary.manifest.bbox, [15.76, 56.59, 15.94, 56.71]);
    assert_eq!(summary.manifest.center, [15.85, 56.65]);
}

#[test]
fn test_skip_existing() {
    let dir = tempfile::tempdir().unwrap();
    let mosaic = flat_square();
    PyramidBuilder::new(config(dir.path(), 24, 24, 2))
        .unwrap()
        .run(&mosaic, &CancelToken::new())
        .unwrap();

    let tile = dir.path().join("24/8388608/8388608.png");
    fs::write(&tile, b"sentinel").unwrap();

    let mut cfg = config(dir.path(), 24, 24, 2);
    cfg.skip_existing = true;
    let summary = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&mosaic, &CancelToken::new())
        .unwrap();

    assert_eq!(summary.zooms[0].existing, 1);
    assert_eq!(summary.zooms[0].written, 0);
    assert_eq!(summary.tile_count, 1);
    assert_eq!(fs::read(&tile).unwrap(), b"sentinel");

    // Without the flag the tile is regenerated
    let summary = PyramidBuilder::new(config(dir.path(), 24, 24, 2))
        .unwrap()
        .run(&mosaic, &CancelToken::new())
        .unwrap();
    assert_eq!(summary.zooms[0].written, 1);
    assert!(read_header(&fs::read(&tile).unwrap()).is_ok());
}

#[test]
fn test_cancelled_build_writes_no_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let builder = PyramidBuilder::new(config(dir.path(), 10, 12, 16)).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = builder.run(&kalmar_slope(None), &cancel).unwrap_err();

    assert!(matches!(err, PyramidError::Cancelled { zoom: 10 }));
    assert_eq!(err.phase(), None);
    assert!(!dir.path().join("bounds.json").exists());
    assert!(png_files(dir.path()).is_empty());
}

/// Wraps a mosaic and cancels the build once more than `cancel_after`
/// samples have been read.
struct CancellingSource<'a> {
    inner: &'a ElevationMosaic,
    reads: AtomicUsize,
    cancel_after: usize,
    cancel: CancelToken,
}

impl<'a> CancellingSource<'a> {
    fn new(inner: &'a ElevationMosaic, cancel_after: usize, cancel: CancelToken) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            cancel_after,
            cancel,
        }
    }
}

impl ElevationSource for CancellingSource<'_> {
    fn dimensions(&self) -> (usize, usize) {
        self.inner.dimensions()
    }

    fn transform(&self) -> &GeoTransform {
        self.inner.transform()
    }

    fn sample(&self, col: usize, row: usize) -> terratiles_dem::Result<Option<f32>> {
        if self.reads.fetch_add(1, Ordering::SeqCst) + 1 > self.cancel_after {
            self.cancel.cancel();
        }
        self.inner.sample(col, row)
    }
}

#[test]
fn test_cancel_between_zooms_keeps_written_tiles() {
    let mosaic = kalmar_slope(None);

    // Count the reads zoom 11 needs on its own
    let first = tempfile::tempdir().unwrap();
    let counting = CancellingSource::new(&mosaic, usize::MAX, CancelToken::new());
    let zoom_11 = PyramidBuilder::new(config(first.path(), 11, 11, 64))
        .unwrap()
        .run(&counting, &CancelToken::new())
        .unwrap();
    let zoom_11_reads = counting.reads.load(Ordering::SeqCst);
    assert!(zoom_11.tile_count >= 1);
    assert!(zoom_11_reads > 0);

    // Cancel on the first read of zoom 12
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let source = CancellingSource::new(&mosaic, zoom_11_reads, cancel.clone());
    let mut cfg = config(dir.path(), 11, 14, 64);
    cfg.threads = Some(2);

    let err = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&source, &cancel)
        .unwrap_err();

    assert!(matches!(err, PyramidError::Cancelled { zoom: 12 }));
    assert_eq!(err.phase(), None);
    assert!(!dir.path().join("bounds.json").exists());
    assert!(files_with_extension(dir.path(), "tmp").is_empty());
    assert!(!dir.path().join("13").exists());
    assert!(!dir.path().join("14").exists());

    // Every zoom 11 tile is complete and matches the uncancelled build
    let zoom_11_files = png_files(&dir.path().join("11"));
    assert_eq!(zoom_11_files.len() as u64, zoom_11.tile_count);
    for path in &zoom_11_files {
        let bytes = fs::read(path).unwrap();
        let pixels = decode_png(&bytes).unwrap();
        assert_eq!((pixels.width(), pixels.height()), (64, 64));
        let twin = first.path().join(path.strip_prefix(dir.path()).unwrap());
        assert_eq!(bytes, fs::read(twin).unwrap());
    }
}

/// A source with a caller-chosen shape that reads as constant 1 m.
struct ShapedSource {
    dimensions: (usize, usize),
    transform: GeoTransform,
}

impl ElevationSource for ShapedSource {
    fn dimensions(&self) -> (usize, usize) {
        self.dimensions
    }

    fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    fn sample(&self, _col: usize, _row: usize) -> terratiles_dem::Result<Option<f32>> {
        Ok(Some(1.0))
    }
}

#[test]
fn test_degenerate_source_fails_before_tile_work() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("tiles");
    let builder = PyramidBuilder::new(config(&output, 20, 24, 2)).unwrap();

    let zero_width = ShapedSource {
        dimensions: (2, 2),
        transform: GeoTransform::north_up(0.0, 0.0, 0.0, -1.0),
    };
    let err = builder.run(&zero_width, &CancelToken::new()).unwrap_err();
    assert!(matches!(
        err,
        PyramidError::Mosaic(DemError::DegenerateTransform(_))
    ));
    assert_eq!(err.phase(), Some(Phase::Configuration));
    assert!(matches!(
        builder.plan(&zero_width),
        Err(PyramidError::Mosaic(DemError::DegenerateTransform(_)))
    ));

    let empty = ShapedSource {
        dimensions: (0, 2),
        transform: GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
    };
    let err = builder.run(&empty, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, PyramidError::Mosaic(DemError::InvalidMosaic(_))));
    assert_eq!(err.phase(), Some(Phase::Configuration));

    // Rejected before the output directory is created
    assert!(!output.exists());
}

#[test]
fn test_invalid_zoom_range_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PyramidBuilder::new(config(dir.path(), 15, 10, 256)).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Configuration));

    let err = PyramidBuilder::new(config(dir.path(), 0, 31, 256)).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Configuration));
}

#[test]
fn test_write_failures_abort_run() {
    let dir = tempfile::tempdir().unwrap();
    // A file where the zoom directory must go
    fs::write(dir.path().join("24"), b"").unwrap();
    let mut cfg = config(dir.path(), 24, 24, 2);
    cfg.max_write_failures = 0;

    let err = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&flat_square(), &CancelToken::new())
        .unwrap_err();

    assert!(matches!(
        err,
        PyramidError::TooManyFailures {
            phase: Phase::Serialization,
            zoom: 24,
            failures: 1,
            limit: 0
        }
    ));
    assert!(!dir.path().join("bounds.json").exists());
}

#[test]
fn test_write_failures_within_limit_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("24"), b"").unwrap();
    let mut cfg = config(dir.path(), 24, 24, 2);
    cfg.max_write_failures = 1;

    let summary = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&flat_square(), &CancelToken::new())
        .unwrap();

    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.tile_count, 0);
    assert!(dir.path().join("bounds.json").exists());
}

/// A source whose reads always fail.
struct UnreadableSource {
    transform: GeoTransform,
}

impl ElevationSource for UnreadableSource {
    fn dimensions(&self) -> (usize, usize) {
        (2, 2)
    }

    fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    fn sample(&self, col: usize, row: usize) -> terratiles_dem::Result<Option<f32>> {
        Err(DemError::SampleRead {
            col,
            row,
            reason: "volume offline".to_string(),
        })
    }
}

#[test]
fn test_resampling_failures_are_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let source = UnreadableSource {
        transform: GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
    };
    let mut cfg = config(dir.path(), 24, 24, 2);
    cfg.max_write_failures = 0;

    let summary = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&source, &CancelToken::new())
        .unwrap();

    assert_eq!(summary.zooms[0].failed, 1);
    assert_eq!(summary.tile_count, 0);
    assert!(summary.manifest_path.exists());
}

#[test]
fn test_plan_matches_build_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let mosaic = kalmar_slope(Some(-9999.0));
    let builder = PyramidBuilder::new(config(dir.path(), 10, 12, 16)).unwrap();

    let ranges = builder.plan(&mosaic).unwrap();
    assert!(png_files(dir.path()).is_empty());

    let summary = builder.run(&mosaic, &CancelToken::new()).unwrap();
    let planned: Vec<u64> = ranges.iter().map(|r| r.tile_count()).collect();
    let built: Vec<u64> = summary.zooms.iter().map(|z| z.candidates).collect();
    assert_eq!(planned, built);
}
