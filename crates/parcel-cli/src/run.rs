//! Shared wiring for the pipeline-running subcommands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use parcel_core::QueryRectangle;
use parcel_pipeline::{CancelSignal, Orchestrator, PipelineConfig, PipelineError, RunReport};

/// Output options shared by `fetch` and `crawl`.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// GeoJSON store to create or extend (overrides the configured path).
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Also convert the store to this Shapefile after persisting.
    #[arg(long)]
    pub shp: Option<PathBuf>,

    /// Expected result count per rectangle (overrides the configured value).
    #[arg(long)]
    pub count: Option<u32>,
}

/// Load configuration and apply command-line overrides.
pub fn load_config(config: Option<&Path>, output: &OutputArgs) -> Result<PipelineConfig> {
    let mut cfg = PipelineConfig::load(config).context("failed to load configuration")?;
    if let Some(path) = &output.output {
        cfg.geojson_output = path.clone();
    }
    if output.shp.is_some() {
        cfg.shapefile_output = output.shp.clone();
    }
    if let Some(count) = output.count {
        cfg.expected_count = count.max(1);
    }
    tracing::debug!(config = ?cfg, "configuration loaded");
    Ok(cfg)
}

/// Run the orchestrator over `rectangles` and print a summary.
pub async fn run_pipeline(
    cfg: &PipelineConfig,
    rectangles: Vec<QueryRectangle>,
    max_rectangle_id: Option<u64>,
    cancel: CancelSignal,
) -> Result<u8> {
    let client = cfg.query_client().context("failed to build query client")?;
    let decryptor = cfg.decryptor().context("invalid private key")?;

    let mut orchestrator = Orchestrator::new(client, decryptor, cfg.store())
        .with_shapefile_output(cfg.shapefile_output.clone())
        .with_max_consecutive_failures(cfg.max_consecutive_failures)
        .with_max_rectangle_id(max_rectangle_id)
        .with_cancel_signal(cancel);

    match orchestrator.run(rectangles).await {
        Ok(report) => {
            print_summary(&cfg.geojson_output, &report);
            Ok(0)
        }
        Err(PipelineError::Systemic {
            consecutive,
            last_error,
            persisted,
        }) => {
            if let Some(write) = persisted {
                println!(
                    "Persisted {} new features ({} total) to {} before aborting",
                    write.appended,
                    write.total_records,
                    cfg.geojson_output.display()
                );
            }
            anyhow::bail!("aborted after {consecutive} consecutive rectangle failures: {last_error}")
        }
        Err(e) => Err(e).context("pipeline failed"),
    }
}

fn print_summary(store: &Path, report: &RunReport) {
    println!(
        "Rectangles: {} attempted, {} failed",
        report.rectangles_attempted, report.rectangles_failed
    );
    println!("Features fetched: {}", report.features_fetched);
    if let Some(write) = &report.write {
        println!(
            "Persisted {} new features ({} already present, {} total) to {}",
            write.appended,
            write.already_present,
            write.total_records,
            store.display()
        );
    }
    if let Some(conversion) = &report.conversion {
        println!(
            "Shapefile: {} records written to {}",
            conversion.records,
            conversion.shapefile.display()
        );
    }
    if report.cancelled {
        println!("Run was cancelled; partial results were persisted.");
    }
}
