//! `terratiles` - build Terrarium terrain tile pyramids from a Web Mercator
//! elevation mosaic.
//!
//! ```text
//! terratiles build merged_3857.tif --config tiles.yaml --output public/terrain-tiles
//! terratiles build merged_3857.tif --metrics-output metrics.json
//! terratiles plan merged_3857.tif --min-zoom 10 --max-zoom 15
//! terratiles verify public/terrain-tiles/12/2227/1253.png
//! ```

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use terratiles_codec::{decode_png, read_chunks};
use terratiles_dem::ElevationMosaic;
use terratiles_runner::metrics_export::InMemoryRecorder;
use terratiles_runner::{CancelToken, PyramidBuilder, PyramidConfig, PyramidError};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "terratiles", version, about = "Terrarium terrain tile pyramid builder")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the tile pyramid and bounds.json
    Build(BuildArgs),
    /// Show the candidate tile ranges without writing anything
    Plan(PlanArgs),
    /// Validate PNG tiles (signature, chunk lengths, CRCs)
    Verify(VerifyArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Single-band GeoTIFF mosaic in EPSG:3857
    mosaic: PathBuf,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Lowest zoom level
    #[arg(long)]
    min_zoom: Option<u8>,

    /// Highest zoom level
    #[arg(long)]
    max_zoom: Option<u8>,

    /// Tile edge in pixels
    #[arg(long)]
    tile_size: Option<u32>,

    /// Manifest bbox as lonMin,latMin,lonMax,latMax
    #[arg(long, value_parser = parse_floats::<4>, allow_hyphen_values = true)]
    bbox: Option<[f64; 4]>,

    /// Manifest centre as lon,lat
    #[arg(long, value_parser = parse_floats::<2>, allow_hyphen_values = true)]
    center: Option<[f64; 2]>,

    /// Keep tiles that already exist
    #[arg(long)]
    skip_existing: bool,

    /// Worker threads
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Serialization failures tolerated before aborting
    #[arg(long)]
    max_write_failures: Option<usize>,

    /// Write the build's metrics as JSON to this file
    #[arg(long, value_name = "FILE")]
    metrics_output: Option<PathBuf>,
}

#[derive(Args)]
struct PlanArgs {
    /// Single-band GeoTIFF mosaic in EPSG:3857
    mosaic: PathBuf,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Lowest zoom level
    #[arg(long)]
    min_zoom: Option<u8>,

    /// Highest zoom level
    #[arg(long)]
    max_zoom: Option<u8>,
}

#[derive(Args)]
struct VerifyArgs {
    /// Tile files to check
    #[arg(required = true)]
    tiles: Vec<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Pyramid(#[from] PyramidError),

    #[error("{invalid} of {total} tiles are invalid")]
    InvalidTiles { invalid: usize, total: usize },

    #[error("Failed to write metrics to {path}: {source}")]
    MetricsOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Build(args) => build(args),
        Command::Plan(args) => plan(args),
        Command::Verify(args) => verify(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Pyramid(e)) => {
            match e.phase() {
                Some(phase) => eprintln!("{} failed: {}", phase, e),
                None => eprintln!("{}", e),
            }
            ExitCode::FAILURE
        }
        Err(e @ CliError::InvalidTiles { .. }) => {
            eprintln!("verify failed: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Install an in-memory recorder as the global metrics recorder.
fn install_recorder() -> Arc<InMemoryRecorder> {
    let recorder = Arc::new(InMemoryRecorder::new());
    if let Err(e) = metrics::set_global_recorder(recorder.clone()) {
        warn!("Failed to install metrics recorder: {}", e);
    }
    terratiles_metrics::describe_metrics();
    recorder
}

fn load_config(path: Option<&PathBuf>) -> Result<PyramidConfig, PyramidError> {
    match path {
        Some(path) => PyramidConfig::from_file(path),
        None => Ok(PyramidConfig::default()),
    }
}

fn build(args: BuildArgs) -> Result<(), CliError> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(zoom) = args.min_zoom {
        config.min_zoom = zoom;
    }
    if let Some(zoom) = args.max_zoom {
        config.max_zoom = zoom;
    }
    if let Some(size) = args.tile_size {
        config.tile_size = size;
    }
    if args.bbox.is_some() {
        config.search_bbox = args.bbox;
    }
    if args.center.is_some() {
        config.center = args.center;
    }
    if args.skip_existing {
        config.skip_existing = true;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    if let Some(limit) = args.max_write_failures {
        config.max_write_failures = limit;
    }

    let builder = PyramidBuilder::new(config)?;
    let recorder = args.metrics_output.as_ref().map(|_| install_recorder());

    info!("Loading mosaic from {}", args.mosaic.display());
    let mosaic = ElevationMosaic::from_geotiff(&args.mosaic).map_err(PyramidError::from)?;
    let (width, height) = mosaic.dimensions();
    info!(
        "Mosaic {}x{} ({}), {} nodata samples",
        width,
        height,
        mosaic.crs(),
        mosaic.nodata_count()
    );

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling after in-flight tiles...");
        handler_token.cancel();
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let result = builder.run(&mosaic, &cancel);
    if let (Some(recorder), Some(path)) = (&recorder, &args.metrics_output) {
        recorder
            .snapshot()
            .write_json(path)
            .map_err(|source| CliError::MetricsOutput {
                path: path.clone(),
                source,
            })?;
        info!("Metrics written to {}", path.display());
    }
    let summary = result?;

    println!();
    println!("{:>5} {:>10} {:>8} {:>8} {:>8} {:>8} {:>7} {:>10}", "zoom", "candidates", "written", "empty", "outside", "existing", "failed", "KB");
    for z in &summary.zooms {
        println!(
            "{:>5} {:>10} {:>8} {:>8} {:>8} {:>8} {:>7} {:>10.1}",
            z.zoom,
            z.candidates,
            z.written,
            z.empty,
            z.outside,
            z.existing,
            z.failed,
            z.bytes as f64 / 1024.0
        );
    }
    println!();
    println!(
        "{} terrain tiles ({:.1} MB written) in {:.1}s",
        summary.tile_count,
        summary.total_bytes as f64 / 1_048_576.0,
        summary.elapsed.as_secs_f64()
    );
    println!("Bounds: {}", summary.manifest_path.display());
    if summary.failed() > 0 {
        warn!("{} tiles failed and were not written", summary.failed());
    }
    Ok(())
}

fn plan(args: PlanArgs) -> Result<(), CliError> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(zoom) = args.min_zoom {
        config.min_zoom = zoom;
    }
    if let Some(zoom) = args.max_zoom {
        config.max_zoom = zoom;
    }
    let builder = PyramidBuilder::new(config)?;
    let mosaic = ElevationMosaic::from_geotiff(&args.mosaic).map_err(PyramidError::from)?;

    let (width, height) = mosaic.dimensions();
    let [lon_min, lat_min, lon_max, lat_max] = mosaic.geographic_bounds();
    println!("Mosaic: {}x{} ({})", width, height, mosaic.crs());
    println!(
        "Zooms: {}-{} at {}px",
        builder.config().min_zoom,
        builder.config().max_zoom,
        builder.config().tile_size
    );
    println!(
        "Coverage: lat {:.4}° to {:.4}°, lon {:.4}° to {:.4}°",
        lat_min, lat_max, lon_min, lon_max
    );

    let mut total = 0u64;
    for range in builder.plan(&mosaic)? {
        println!(
            "Zoom {:>2}: tiles x={}-{}, y={}-{} ({} candidates)",
            range.zoom,
            range.x_min,
            range.x_max,
            range.y_min,
            range.y_max,
            range.tile_count()
        );
        total += range.tile_count();
    }
    println!("Total: {} candidates", total);
    Ok(())
}

fn verify(args: VerifyArgs) -> Result<(), CliError> {
    let total = args.tiles.len();
    let mut invalid = 0;

    for path in &args.tiles {
        let checked = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                let chunks = read_chunks(&bytes).map_err(|e| e.to_string())?;
                let grid = decode_png(&bytes).map_err(|e| e.to_string())?;
                Ok((chunks.len(), grid))
            });

        match checked {
            Ok((chunks, grid)) => {
                let heights = grid.heights();
                let min = heights.iter().copied().fold(f64::INFINITY, f64::min);
                let max = heights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                println!(
                    "{}: OK {}x{}, {} chunks, elevation {:.2} to {:.2} m",
                    path.display(),
                    grid.width(),
                    grid.height(),
                    chunks,
                    min,
                    max
                );
            }
            Err(reason) => {
                invalid += 1;
                println!("{}: INVALID {}", path.display(), reason);
            }
        }
    }

    if invalid > 0 {
        return Err(CliError::InvalidTiles { invalid, total });
    }
    Ok(())
}

/// Parse `N` comma-separated floats.
fn parse_floats<const N: usize>(s: &str) -> Result<[f64; N], String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("'{}': {}", v, e)))
        .collect::<Result<Vec<_>, _>>()?;
    values
        .try_into()
        .map_err(|v: Vec<f64>| format!("expected {} comma-separated numbers, got {}", N, v.len()))
}
