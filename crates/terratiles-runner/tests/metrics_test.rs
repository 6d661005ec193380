//! Metrics emitted by pyramid builds.
//!
//! The global recorder can only be installed once per process, so every
//! build in this file runs inside a single test and the assertions compare
//! cumulative counters against each build's summary.

use std::fs;
use std::sync::Arc;
use terratiles_dem::{mercator, Crs, ElevationMosaic, GeoTransform};
use terratiles_metrics::metric_defs;
use terratiles_runner::metrics_export::InMemoryRecorder;
use terratiles_runner::{CancelToken, PyramidBuilder, PyramidConfig};

/// A 64×64 mosaic with 30 m pixels over Kalmar, sloping west to east.
fn kalmar_slope() -> ElevationMosaic {
    let (x, y) = mercator::from_geographic(56.66, 16.36);
    let data = (0..64 * 64).map(|i| 2.0 + (i % 64) as f32 * 0.5).collect();
    ElevationMosaic::new(
        data,
        64,
        64,
        GeoTransform::north_up(x, y, 30.0, -30.0),
        Crs::WEB_MERCATOR,
        None,
    )
    .unwrap()
}

fn config(dir: &std::path::Path, min_zoom: u8, max_zoom: u8, tile_size: u32) -> PyramidConfig {
    PyramidConfig {
        tile_size,
        min_zoom,
        max_zoom,
        output_dir: dir.to_path_buf(),
        ..PyramidConfig::default()
    }
}

#[test]
fn test_build_metrics_match_summary() {
    let recorder = Arc::new(InMemoryRecorder::new());
    metrics::set_global_recorder(recorder.clone()).expect("recorder already installed");
    terratiles_metrics::describe_metrics();

    let mosaic = kalmar_slope();
    let dir = tempfile::tempdir().unwrap();

    // Fresh build
    let mut cfg = config(dir.path(), 11, 13, 64);
    cfg.threads = Some(2);
    let built = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&mosaic, &CancelToken::new())
        .unwrap();

    let snapshot = recorder.snapshot();
    let mut written_total = 0;
    for zoom in &built.zooms {
        let z = zoom.zoom.to_string();
        let z = z.as_str();
        assert_eq!(
            snapshot.counter_with(metric_defs::TILES_WRITTEN.name, &[("zoom", z)]),
            zoom.written as u64,
            "written at zoom {}",
            z
        );
        assert_eq!(
            snapshot.counter_with(
                metric_defs::TILES_SKIPPED.name,
                &[("zoom", z), ("reason", "empty")]
            ),
            zoom.empty as u64
        );
        assert_eq!(
            snapshot.counter_with(
                metric_defs::TILES_SKIPPED.name,
                &[("zoom", z), ("reason", "outside")]
            ),
            zoom.outside as u64
        );
        assert_eq!(
            snapshot.gauge_with(metric_defs::ZOOM_CANDIDATES.name, &[("zoom", z)]),
            Some(zoom.candidates as f64)
        );
        written_total += zoom.written as u64;
    }
    assert!(written_total > 0);
    assert_eq!(snapshot.counter(metric_defs::TILES_WRITTEN.name), written_total);
    assert_eq!(snapshot.counter(metric_defs::TILES_FAILED.name), 0);

    let sizes = snapshot
        .histogram_with(metric_defs::TILE_SIZE.name, &[])
        .unwrap();
    assert_eq!(sizes.count, written_total);
    assert_eq!(sizes.sum as u64, built.total_bytes);
    let times = snapshot
        .histogram_with(metric_defs::TILE_PROCESS_TIME.name, &[])
        .unwrap();
    assert_eq!(times.count, written_total);

    // Rebuild keeping existing tiles
    let mut cfg = config(dir.path(), 11, 13, 64);
    cfg.skip_existing = true;
    let resumed = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&mosaic, &CancelToken::new())
        .unwrap();

    let snapshot = recorder.snapshot();
    for (before, after) in built.zooms.iter().zip(&resumed.zooms) {
        let z = after.zoom.to_string();
        assert_eq!(after.existing, before.written);
        assert_eq!(
            snapshot.counter_with(
                metric_defs::TILES_SKIPPED.name,
                &[("zoom", z.as_str()), ("reason", "exists")]
            ),
            after.existing as u64
        );
    }
    assert_eq!(snapshot.counter(metric_defs::TILES_WRITTEN.name), written_total);

    // A file where the zoom directory must go makes the write fail
    let blocked = tempfile::tempdir().unwrap();
    fs::write(blocked.path().join("24"), b"").unwrap();
    let mut cfg = config(blocked.path(), 24, 24, 2);
    cfg.max_write_failures = 1;
    let flat = ElevationMosaic::new(
        vec![10.0; 4],
        2,
        2,
        GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
        Crs::WEB_MERCATOR,
        None,
    )
    .unwrap();
    let failed = PyramidBuilder::new(cfg)
        .unwrap()
        .run(&flat, &CancelToken::new())
        .unwrap();
    assert_eq!(failed.failed(), 1);

    let snapshot = recorder.snapshot();
    assert_eq!(
        snapshot.counter_with(
            metric_defs::TILES_FAILED.name,
            &[("zoom", "24"), ("phase", "serialization")]
        ),
        1
    );
    assert_eq!(snapshot.counter(metric_defs::TILES_FAILED.name), 1);

    let export = snapshot.to_export();
    assert!(export.metrics.contains_key(metric_defs::TILES_WRITTEN.name));
    assert!(export.metrics.contains_key(metric_defs::TILES_FAILED.name));
}
