//! # Query Rectangles
//!
//! A [`QueryRectangle`] is the spatial window for one remote query. The
//! corners are kept exactly as supplied: callers may pass top-left /
//! bottom-right pairs, bottom-left / top-right pairs, or anything else.
//! The boundary ring walks the corners in a fixed order regardless.

use serde::{Deserialize, Serialize};

/// Maximum number of results the remote service returns for one query.
pub const DEFAULT_EXPECTED_COUNT: u32 = 1000;

/// One spatial query window in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryRectangle {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// Expected result count hint forwarded to the service.
    pub expected_count: u32,
    /// External identifier (tile id) when the rectangle came from a tiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl QueryRectangle {
    /// Create a rectangle from two corners with the default expected count.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            expected_count: DEFAULT_EXPECTED_COUNT,
            id: None,
        }
    }

    /// Attach an external identifier.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Override the expected result count hint.
    pub fn with_expected_count(mut self, expected_count: u32) -> Self {
        self.expected_count = expected_count;
        self
    }

    /// Closed five-point boundary ring: (x1,y1), (x2,y1), (x2,y2), (x1,y2), (x1,y1).
    pub fn boundary_ring(&self) -> [(f64, f64); 5] {
        [
            (self.x1, self.y1),
            (self.x2, self.y1),
            (self.x2, self.y2),
            (self.x1, self.y2),
            (self.x1, self.y1),
        ]
    }

    /// Axis-normalized bounds as `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.x1.min(self.x2),
            self.y1.min(self.y2),
            self.x1.max(self.x2),
            self.y1.max(self.y2),
        )
    }
}

impl std::fmt::Display for QueryRectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(id) = self.id {
            write!(f, "tile {id} ")?;
        }
        write!(f, "({}, {}) - ({}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}
