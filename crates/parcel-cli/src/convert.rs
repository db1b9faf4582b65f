//! # Convert Subcommand
//!
//! Mirror a GeoJSON store into an ESRI Shapefile. Needs no credentials.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

/// Arguments for the convert subcommand.
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// GeoJSON store to read.
    pub source: PathBuf,
    /// Shapefile to write (`.shp`; `.shx`, `.dbf`, `.prj`, `.cpg` alongside).
    pub target: PathBuf,
}

pub fn run_convert(args: &ConvertArgs) -> Result<u8> {
    let report = parcel_store::convert(Some(args.source.as_path()), Some(args.target.as_path()))
        .with_context(|| format!("failed to convert {}", args.source.display()))?;
    if let Some(report) = report {
        println!(
            "Wrote {} records to {}",
            report.records,
            report.shapefile.display()
        );
        for (field, property, kind) in &report.fields {
            println!("  {field:<10} {kind:?} (from {property})");
        }
    }
    Ok(0)
}
