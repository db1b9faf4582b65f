//! # Crawl Subcommand
//!
//! Query every tile of a tile file in order:
//!
//! ```bash
//! parcel crawl tiles/henan.geojson --max-tile-id 10 --shp out/henan.shp
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use parcel_pipeline::{load_tile_rectangles, CancelSignal};

use crate::run::{load_config, run_pipeline, OutputArgs};

/// Arguments for the crawl subcommand.
#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// GeoJSON tile file (as written by `parcel tile`).
    pub tiles: PathBuf,

    /// Stop after the tile with this id.
    #[arg(long)]
    pub max_tile_id: Option<u64>,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub async fn run_crawl(args: &CrawlArgs, config: Option<&Path>, cancel: CancelSignal) -> Result<u8> {
    let cfg = load_config(config, &args.output)?;
    let rectangles = load_tile_rectangles(&args.tiles, cfg.expected_count)
        .with_context(|| format!("failed to read tiles from {}", args.tiles.display()))?;
    tracing::info!(
        tiles = rectangles.len(),
        max_tile_id = ?args.max_tile_id,
        "crawling tile file"
    );
    run_pipeline(&cfg, rectangles, args.max_tile_id, cancel).await
}
