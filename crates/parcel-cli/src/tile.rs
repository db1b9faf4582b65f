//! # Tile Subcommand
//!
//! Cut a boundary (GeoJSON or polygon Shapefile) into square query tiles
//! and write them as a tile file for `parcel crawl`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use parcel_pipeline::{grid_tiles, load_boundary, write_tiles};

/// Arguments for the tile subcommand.
#[derive(Args, Debug)]
pub struct TileArgs {
    /// Boundary file (`.geojson` or `.shp`) in EPSG:4490.
    pub boundary: PathBuf,

    /// Tile file to write.
    #[arg(long, short = 'o')]
    pub output: PathBuf,

    /// Tile edge length in degrees.
    #[arg(long, default_value_t = 0.05)]
    pub size: f64,
}

pub fn run_tile(args: &TileArgs) -> Result<u8> {
    let boundary = load_boundary(&args.boundary)
        .with_context(|| format!("failed to read boundary {}", args.boundary.display()))?;
    let tiles = grid_tiles(&boundary, args.size)?;
    write_tiles(&args.output, &tiles)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("Wrote {} tiles to {}", tiles.len(), args.output.display());
    Ok(0)
}
