//! # Fetch Subcommand
//!
//! Query a single rectangle:
//!
//! ```bash
//! parcel fetch 120.63954 32.43703 120.6456 32.43089 -o output.geojson
//! ```

use std::path::Path;

use anyhow::Result;
use clap::Args;
use parcel_core::QueryRectangle;
use parcel_pipeline::CancelSignal;

use crate::run::{load_config, run_pipeline, OutputArgs};

/// Arguments for the fetch subcommand.
#[derive(Args, Debug)]
pub struct FetchArgs {
    /// First corner longitude.
    #[arg(allow_negative_numbers = true)]
    pub x1: f64,
    /// First corner latitude.
    #[arg(allow_negative_numbers = true)]
    pub y1: f64,
    /// Opposite corner longitude.
    #[arg(allow_negative_numbers = true)]
    pub x2: f64,
    /// Opposite corner latitude.
    #[arg(allow_negative_numbers = true)]
    pub y2: f64,

    /// Identifier reported in progress output.
    #[arg(long)]
    pub id: Option<u64>,

    #[command(flatten)]
    pub output: OutputArgs,
}

impl FetchArgs {
    pub fn rectangle(&self, expected_count: u32) -> QueryRectangle {
        let rect = QueryRectangle::new(self.x1, self.y1, self.x2, self.y2)
            .with_expected_count(expected_count);
        match self.id {
            Some(id) => rect.with_id(id),
            None => rect,
        }
    }
}

pub async fn run_fetch(args: &FetchArgs, config: Option<&Path>, cancel: CancelSignal) -> Result<u8> {
    let cfg = load_config(config, &args.output)?;
    let rect = args.rectangle(cfg.expected_count);
    tracing::info!(rectangle = %rect, "fetching single rectangle");
    run_pipeline(&cfg, vec![rect], None, cancel).await
}
