//! # parcel-store — Incremental Parcel Persistence
//!
//! [`ParcelStore`] keeps (identifier, polygon) records in a single GeoJSON
//! `FeatureCollection` declared in CGCS2000 (EPSG:4490).
//!
//! ## Write Semantics
//!
//! Each [`ParcelStore::write_features`] call:
//!
//! 1. creates missing parent directories;
//! 2. reads the whole existing store (if any) to collect present identifiers;
//! 3. drops incoming features whose identifier is already present, and
//!    collapses duplicates inside the batch (first occurrence wins);
//! 4. reconstructs polygons for the survivors on a scoped `rayon` pool,
//!    in fixed-size chunks;
//! 5. writes the complete new document to a temporary file next to the
//!    target and renames it into place.
//!
//! A failure at any step leaves the previous file untouched.
//!
//! ## Concurrency
//!
//! One writer per path. The store takes no lock; callers serialize access.
//!
//! ## Conversion
//!
//! [`converter`] mirrors a store into an ESRI Shapefile with the same
//! schema and reference system.

pub mod converter;
pub mod error;
pub mod store;

pub use converter::{convert, ConversionReport, FieldKind};
pub use error::{ConvertError, StoreError};
pub use store::{ParcelStore, StoredRecord, WriteReport, DEFAULT_CHUNK_SIZE};
