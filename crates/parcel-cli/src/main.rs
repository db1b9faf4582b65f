//! # parcel CLI entry point
//!
//! Parses command-line arguments, installs the tracing subscriber, wires
//! Ctrl-C to the pipeline's cancel signal, and dispatches to subcommand
//! handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parcel_cli::convert::{run_convert, ConvertArgs};
use parcel_cli::crawl::{run_crawl, CrawlArgs};
use parcel_cli::fetch::{run_fetch, FetchArgs};
use parcel_cli::tile::{run_tile, TileArgs};
use parcel_pipeline::CancelSignal;

/// Land-parcel acquisition pipeline.
///
/// Queries the remote map service one rectangle at a time, decrypts the
/// responses, and keeps a deduplicated GeoJSON store that can be
/// converted to a Shapefile. Credentials come from `--config` and/or
/// `PARCEL_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "parcel", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a YAML configuration file.
    #[arg(long, global = true, env = "PARCEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Query a single rectangle and persist its parcels.
    Fetch(FetchArgs),

    /// Query every tile of a tile file.
    Crawl(CrawlArgs),

    /// Convert a GeoJSON store to a Shapefile.
    Convert(ConvertArgs),

    /// Cut a boundary into query tiles.
    Tile(TileArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::debug!("parcel CLI starting");

    let cancel = CancelSignal::new();
    spawn_interrupt_handler(cancel.clone());

    let config = cli.config.as_deref();
    let result = match &cli.command {
        Commands::Fetch(args) => run_fetch(args, config, cancel).await,
        Commands::Crawl(args) => run_crawl(args, config, cancel).await,
        Commands::Convert(args) => run_convert(args),
        Commands::Tile(args) => run_tile(args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// First Ctrl-C requests a graceful stop between rectangles; a second one
/// exits immediately.
fn spawn_interrupt_handler(cancel: CancelSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupt received, finishing current rectangle then persisting");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("second interrupt, exiting without persisting");
            std::process::exit(130);
        }
    });
}
