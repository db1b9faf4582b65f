//! # parcel-cli — Parcel Pipeline Command-Line Interface
//!
//! ## Subcommands
//!
//! - `fetch` — query one rectangle and persist its parcels
//! - `crawl` — query every tile of a tile file, optionally up to a tile id
//! - `convert` — mirror a GeoJSON store into a Shapefile
//! - `tile` — cut a boundary into query tiles
//!
//! Handlers parse nothing themselves and hold no pipeline logic; they
//! load configuration, wire the orchestrator, and print a summary.

pub mod convert;
pub mod crawl;
pub mod fetch;
pub mod run;
pub mod tile;
