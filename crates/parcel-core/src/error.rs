//! # Geometry Error Types
//!
//! Raised when a parts/points encoding cannot be turned into a polygon.
//! Reconstruction never truncates: any mismatch between the ring lengths
//! and the point sequence is reported with the offending ring index.

use thiserror::Error;

/// Malformed parts/points geometry encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// The parts sequence is empty, so there is no exterior ring.
    #[error("geometry has no parts")]
    NoParts,

    /// The points sequence is empty.
    #[error("geometry has no points")]
    NoPoints,

    /// A parts entry declares a ring of zero points.
    #[error("ring {ring} has zero points")]
    EmptyRing { ring: usize },

    /// A parts entry runs past the end of the points sequence.
    #[error("ring {ring} spans points {start}..{end} but only {available} points exist")]
    RingOutOfRange {
        ring: usize,
        start: usize,
        end: usize,
        available: usize,
    },

    /// Points remain after every parts entry has been consumed.
    #[error("{unused} trailing points are not covered by parts (consumed {consumed})")]
    TrailingPoints { consumed: usize, unused: usize },

    /// A GeoJSON position with fewer than two ordinates.
    #[error("position has {0} ordinates, expected at least 2")]
    InvalidPosition(usize),

    /// A GeoJSON geometry type other than Polygon/MultiPolygon.
    #[error("unsupported geometry type: {0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_display_names_ring_and_bounds() {
        let err = GeometryError::RingOutOfRange {
            ring: 1,
            start: 5,
            end: 10,
            available: 9,
        };
        let msg = format!("{err}");
        assert!(msg.contains("ring 1"));
        assert!(msg.contains("5..10"));
        assert!(msg.contains("9 points"));
    }

    #[test]
    fn trailing_points_display() {
        let err = GeometryError::TrailingPoints {
            consumed: 5,
            unused: 2,
        };
        assert!(format!("{err}").contains("2 trailing points"));
    }
}
