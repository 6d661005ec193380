//! Example: List the tile ranges that cover a mosaic.
//!
//! Usage: cargo run --example tile_ranges -- <mosaic.tif> [min_zoom] [max_zoom]

use std::env;
use std::time::Instant;
use terratiles_dem::{pyramid_ranges, ElevationMosaic};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <mosaic.tif> [min_zoom] [max_zoom]", args[0]);
        eprintln!("Example: {} ./data/merged_3857.tif 10 15", args[0]);
        std::process::exit(1);
    }

    let min_zoom: u8 = args.get(2).map_or(10, |s| s.parse().expect("Invalid min zoom"));
    let max_zoom: u8 = args.get(3).map_or(15, |s| s.parse().expect("Invalid max zoom"));

    println!("Loading mosaic from {}...", args[1]);
    let start = Instant::now();
    let mosaic = ElevationMosaic::from_geotiff(&args[1]).expect("Failed to load mosaic");
    let (width, height) = mosaic.dimensions();
    println!(
        "Loaded {}x{} mosaic ({}) in {:.3}s",
        width,
        height,
        mosaic.crs(),
        start.elapsed().as_secs_f64()
    );

    let [lon_min, lat_min, lon_max, lat_max] = mosaic.geographic_bounds();
    println!(
        "Coverage: lat {:.4}° to {:.4}°, lon {:.4}° to {:.4}°",
        lat_min, lat_max, lon_min, lon_max
    );

    let ranges = pyramid_ranges(&mosaic.projected_bounds(), min_zoom, max_zoom)
        .expect("Invalid zoom range");
    for range in ranges {
        println!(
            "Zoom {:>2}: x={}-{}, y={}-{} ({} tiles)",
            range.zoom,
            range.x_min,
            range.x_max,
            range.y_min,
            range.y_max,
            range.tile_count()
        );
    }
}
