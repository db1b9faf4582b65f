//! # Parts/Points Polygon Reconstruction
//!
//! The remote service flattens a polygon into two arrays: `parts`, the
//! length of each ring, and `points`, every vertex of every ring in order.
//! [`reconstruct`] walks `parts`, slicing a contiguous run of points per
//! entry. The first slice is the exterior ring whatever its winding; every
//! later slice is a hole.
//!
//! ## Invariants
//!
//! - Coordinates are copied in source order. Rings are not closed,
//!   reoriented, or deduplicated; the source encoding already closes them.
//! - The slices must cover `points` exactly. A ring past the end, a
//!   zero-length ring, or unconsumed trailing points are errors, so a
//!   malformed feature is never silently truncated.

use geo::BoundingRect;
use geo_types::{Coord, LineString, Polygon, Rect};

use crate::error::GeometryError;
use crate::feature::RawPoint;

/// A reconstructed polygon: one exterior ring plus zero or more holes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelPolygon {
    exterior: LineString<f64>,
    interiors: Vec<LineString<f64>>,
}

impl ParcelPolygon {
    /// Assemble a polygon from rings that are already known to be valid.
    pub fn new(exterior: LineString<f64>, interiors: Vec<LineString<f64>>) -> Self {
        Self {
            exterior,
            interiors,
        }
    }

    pub fn exterior(&self) -> &LineString<f64> {
        &self.exterior
    }

    pub fn interiors(&self) -> &[LineString<f64>] {
        &self.interiors
    }

    /// Exterior followed by holes, in source order.
    pub fn rings(&self) -> impl Iterator<Item = &LineString<f64>> {
        std::iter::once(&self.exterior).chain(self.interiors.iter())
    }

    /// Total vertex count over all rings.
    pub fn point_count(&self) -> usize {
        self.rings().map(|r| r.0.len()).sum()
    }

    /// Bounding box of the exterior ring.
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.exterior.bounding_rect()
    }

    /// Convert into a `geo_types::Polygon`. Note that `geo_types` closes
    /// any ring that is not already closed.
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(self.exterior.clone(), self.interiors.clone())
    }
}

/// Rebuild a polygon from its parts/points encoding.
pub fn reconstruct(parts: &[usize], points: &[RawPoint]) -> Result<ParcelPolygon, GeometryError> {
    if parts.is_empty() {
        return Err(GeometryError::NoParts);
    }
    if points.is_empty() {
        return Err(GeometryError::NoPoints);
    }

    let mut rings = Vec::with_capacity(parts.len());
    let mut start = 0usize;
    for (ring, &len) in parts.iter().enumerate() {
        if len == 0 {
            return Err(GeometryError::EmptyRing { ring });
        }
        let end = start
            .checked_add(len)
            .filter(|&end| end <= points.len())
            .ok_or(GeometryError::RingOutOfRange {
                ring,
                start,
                end: start.saturating_add(len),
                available: points.len(),
            })?;
        let coords: Vec<Coord<f64>> = points[start..end]
            .iter()
            .map(|p| Coord { x: p.x, y: p.y })
            .collect();
        rings.push(LineString::new(coords));
        start = end;
    }

    if start != points.len() {
        return Err(GeometryError::TrailingPoints {
            consumed: start,
            unused: points.len() - start,
        });
    }

    let mut rings = rings.into_iter();
    // `parts` is non-empty, so there is always a first ring.
    let exterior = rings.next().ok_or(GeometryError::NoParts)?;
    Ok(ParcelPolygon::new(exterior, rings.collect()))
}
