//! # parcel-pipeline — Acquisition Orchestrator
//!
//! Ties the workspace together:
//!
//! - [`Orchestrator`]: runs rectangles through query → decrypt →
//!   accumulate, then persists the batch once and optionally converts it.
//!   Query and decode are the [`RectangleQuery`] and [`PayloadDecoder`]
//!   seams; production wiring uses `QueryClient` and `PayloadDecryptor`.
//! - [`progress`]: [`PipelineState`], the [`ProgressSink`] interface and
//!   its `tracing` implementation, and [`CancelSignal`].
//! - [`tiles`]: rectangle sources (tile files) and grid tiling of
//!   boundary polygons.
//! - [`config`]: [`PipelineConfig`] from YAML and `PARCEL_*` variables.
//!
//! ## Failure Policy
//!
//! A failing rectangle is reported and skipped. `max_consecutive_failures`
//! failures in a row abort the run with [`PipelineError::Systemic`] after
//! the accumulated batch has been persisted.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod tiles;

pub use config::{FileConfig, PipelineConfig};
pub use error::{ConfigError, PipelineError, RectangleError, TileError};
pub use orchestrator::{
    Orchestrator, PayloadDecoder, RectangleQuery, RunReport, DEFAULT_MAX_CONSECUTIVE_FAILURES,
};
pub use progress::{CancelSignal, PipelineState, ProgressEvent, ProgressSink, TracingSink};
pub use tiles::{grid_tiles, load_boundary, load_tile_rectangles, write_tiles, Tile};
