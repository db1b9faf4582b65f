//! Run state, progress reporting, and cancellation.
//!
//! The orchestrator never logs on its own. It reports every transition
//! and per-rectangle outcome to a caller-supplied [`ProgressSink`];
//! [`TracingSink`] turns those into `tracing` events.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parcel_core::QueryRectangle;
use parcel_store::{ConversionReport, WriteReport};

use crate::error::RectangleError;

/// Orchestrator lifecycle.
///
/// `Idle → Querying → Decrypting → Accumulating → (Querying …) →
/// Persisting → Converting → Done`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PipelineState {
    #[default]
    Idle,
    Querying,
    Decrypting,
    Accumulating,
    Persisting,
    Converting,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Querying => "querying",
            PipelineState::Decrypting => "decrypting",
            PipelineState::Accumulating => "accumulating",
            PipelineState::Persisting => "persisting",
            PipelineState::Converting => "converting",
            PipelineState::Done => "done",
        };
        f.write_str(s)
    }
}

/// One progress notification. `index` is the 1-based position of the
/// rectangle in the run.
#[derive(Debug)]
pub enum ProgressEvent<'a> {
    StateChanged(PipelineState),
    RectangleStarted {
        index: usize,
        rect: &'a QueryRectangle,
    },
    RectangleSucceeded {
        index: usize,
        rect: &'a QueryRectangle,
        features: usize,
        skipped: usize,
        accumulated: usize,
    },
    RectangleFailed {
        index: usize,
        rect: &'a QueryRectangle,
        error: &'a RectangleError,
        consecutive: u32,
    },
    CutoffReached {
        id: u64,
    },
    Cancelled {
        completed: usize,
        accumulated: usize,
    },
    Persisted(&'a WriteReport),
    Converted(&'a ConversionReport),
}

/// Receiver for orchestrator progress.
pub trait ProgressSink: Send + Sync {
    fn record(&self, event: &ProgressEvent<'_>);
}

/// Forwards progress to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn record(&self, event: &ProgressEvent<'_>) {
        match event {
            ProgressEvent::StateChanged(state) => tracing::debug!(%state, "pipeline state"),
            ProgressEvent::RectangleStarted { index, rect } => {
                tracing::info!(index, rectangle = %rect, "querying rectangle")
            }
            ProgressEvent::RectangleSucceeded {
                index,
                rect,
                features,
                skipped,
                accumulated,
            } => tracing::info!(
                index,
                rectangle = %rect,
                features,
                skipped,
                accumulated,
                "rectangle done"
            ),
            ProgressEvent::RectangleFailed {
                index,
                rect,
                error,
                consecutive,
            } => tracing::warn!(
                index,
                rectangle = %rect,
                consecutive,
                "rectangle failed: {error}"
            ),
            ProgressEvent::CutoffReached { id } => {
                tracing::info!(id, "maximum rectangle id reached, stopping")
            }
            ProgressEvent::Cancelled {
                completed,
                accumulated,
            } => tracing::warn!(
                completed,
                accumulated,
                "cancelled, persisting accumulated features"
            ),
            ProgressEvent::Persisted(report) => tracing::info!(
                appended = report.appended,
                already_present = report.already_present,
                total = report.total_records,
                "features persisted"
            ),
            ProgressEvent::Converted(report) => tracing::info!(
                records = report.records,
                shapefile = %report.shapefile.display(),
                "shapefile written"
            ),
        }
    }
}

/// Cooperative cancellation flag, checked between rectangles.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
