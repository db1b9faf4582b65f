//! Pipeline error types.

use std::path::PathBuf;

use parcel_client::QueryError;
use parcel_core::GeometryError;
use parcel_crypto::PayloadError;
use parcel_store::{ConvertError, StoreError, WriteReport};

/// Why a single rectangle contributed nothing.
#[derive(Debug, thiserror::Error)]
pub enum RectangleError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("feature {id}: {source}")]
    Geometry { id: i64, source: GeometryError },
}

/// Run-level failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Too many consecutive rectangles failed; the run was aborted after
    /// persisting whatever had been accumulated.
    #[error("{consecutive} consecutive rectangles failed, aborting: {last_error}")]
    Systemic {
        consecutive: u32,
        last_error: String,
        persisted: Option<WriteReport>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    /// The blocking persistence or conversion task panicked or was cancelled.
    #[error("{stage} task did not complete: {reason}")]
    Task { stage: &'static str, reason: String },
}

/// Errors reading rectangle sources and boundary files.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is not a GeoJSON feature collection: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to read shapefile {path}: {source}")]
    Shapefile {
        path: PathBuf,
        source: shapefile::Error,
    },
    #[error("feature {index} in {path}: {reason}")]
    Feature {
        path: PathBuf,
        index: usize,
        reason: String,
    },
    #[error("boundary {0} contains no polygons")]
    EmptyBoundary(PathBuf),
    #[error("tile size must be a positive number of degrees, got {0}")]
    InvalidTileSize(f64),
    #[error("tile size {tile_size} yields more than {limit} candidate tiles")]
    TooManyTiles { tile_size: f64, limit: u64 },
}

/// Pipeline configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Client(#[from] parcel_client::ConfigError),
}
