//! Persistence and conversion errors.

use std::path::PathBuf;

use parcel_core::GeometryError;

/// Errors from reading or writing a parcel store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is not a valid feature collection: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize store {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// An existing record lacks a usable integer identifier.
    #[error("record {index} in {path} has no integer ID")]
    MissingId { path: PathBuf, index: usize },
    #[error("feature {id}: {source}")]
    Geometry { id: i64, source: GeometryError },
    #[error("worker pool: {0}")]
    WorkerPool(String),
}

/// Errors from converting a store into a Shapefile.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("record {index}: {source}")]
    Geometry {
        index: usize,
        source: GeometryError,
    },
    #[error("store is declared in EPSG:{found}, expected EPSG:4490")]
    ReferenceSystem { found: u32 },
    #[error("record {index}: unsupported geometry type")]
    UnsupportedGeometry { index: usize },
    #[error("field {name:?}: {reason}")]
    Field { name: String, reason: String },
    #[error("shapefile error on {path}: {source}")]
    Shapefile {
        path: PathBuf,
        source: shapefile::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
