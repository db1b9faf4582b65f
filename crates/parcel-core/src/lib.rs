//! # parcel-core — Data Model for the Parcel Pipeline
//!
//! Shared types used by every other crate in the workspace:
//!
//! - [`QueryRectangle`]: the spatial query window sent to the remote
//!   service, plus its expected-count hint and optional tile identifier.
//! - [`Feature`] / [`FeatureGeometry`]: one record as returned by the
//!   remote service, with its flat parts/points geometry encoding.
//! - [`reconstruct`]: turns parts/points into a [`ParcelPolygon`]
//!   (one exterior ring plus holes, coordinates untouched).
//! - [`geojson`]: the GeoJSON document types used by the persisted store,
//!   tile files, and boundary files.
//!
//! ## Reference System
//!
//! Everything in the pipeline is expressed in CGCS2000 geographic
//! coordinates ([`EPSG_CODE`] 4490). No reprojection happens anywhere.

pub mod error;
pub mod feature;
pub mod geojson;
pub mod geometry;
pub mod rectangle;

pub use error::GeometryError;
pub use feature::{Feature, FeatureGeometry, RawPoint};
pub use geojson::{FeatureCollection, GeoFeature, GeoGeometry, NamedCrs};
pub use geometry::{reconstruct, ParcelPolygon};
pub use rectangle::{QueryRectangle, DEFAULT_EXPECTED_COUNT};

/// EPSG code of the fixed geographic reference system (CGCS2000).
pub const EPSG_CODE: u32 = 4490;

/// Name of the integer identifier property, both on the wire and in the store.
pub const ID_PROPERTY: &str = "ID";
