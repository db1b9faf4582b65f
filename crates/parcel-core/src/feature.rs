//! # Remote Service Features
//!
//! A [`Feature`] is one parcel record as it appears inside a decrypted
//! recordset. Only the integer `ID` and the geometry matter to the
//! pipeline; `fieldNames`/`fieldValues` and any other members are kept as
//! auxiliary attributes and never interpreted.
//!
//! Wire shape (abridged):
//!
//! ```json
//! {
//!   "ID": 42,
//!   "fieldNames": ["SMID", "YJJBNTMJ"],
//!   "fieldValues": ["42", "1532.7"],
//!   "geometry": {
//!     "type": "REGION",
//!     "parts": [5],
//!     "points": [{"x": 120.1, "y": 32.4}, ...]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GeometryError;
use crate::geometry::{reconstruct, ParcelPolygon};

/// One coordinate pair in the flat points sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub x: f64,
    pub y: f64,
}

impl RawPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Flat geometry encoding: ring lengths partitioning a point sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGeometry {
    /// Ring lengths, exterior first.
    pub parts: Vec<usize>,
    /// All ring vertices, concatenated in ring order.
    pub points: Vec<RawPoint>,
    /// Service-side geometry type (`"REGION"` for polygons).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl FeatureGeometry {
    /// Single-ring geometry from a list of points.
    pub fn single_ring(points: Vec<RawPoint>) -> Self {
        Self {
            parts: vec![points.len()],
            points,
            kind: Some("REGION".into()),
        }
    }

    /// Rebuild the polygon described by this encoding.
    pub fn to_polygon(&self) -> Result<ParcelPolygon, GeometryError> {
        reconstruct(&self.parts, &self.points)
    }
}

/// One parcel record from a decrypted recordset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Deduplication key.
    #[serde(rename = "ID")]
    pub id: i64,
    pub geometry: FeatureGeometry,
    #[serde(rename = "fieldNames", default, skip_serializing_if = "Vec::is_empty")]
    pub field_names: Vec<String>,
    #[serde(rename = "fieldValues", default, skip_serializing_if = "Vec::is_empty")]
    pub field_values: Vec<Value>,
    /// Every other member of the record, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Feature {
    /// Feature with the given identifier and geometry and no attributes.
    pub fn new(id: i64, geometry: FeatureGeometry) -> Self {
        Self {
            id,
            geometry,
            field_names: Vec::new(),
            field_values: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Look up an auxiliary attribute by its field name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.field_names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .and_then(|i| self.field_values.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_service_record() {
        let raw = json!({
            "ID": 42,
            "fieldNames": ["SMID", "YJJBNTMJ"],
            "fieldValues": ["42", "1532.7"],
            "geometry": {
                "id": 42,
                "type": "REGION",
                "parts": [5],
                "points": [
                    {"x": 0.0, "y": 0.0, "type": "Point"},
                    {"x": 1.0, "y": 0.0},
                    {"x": 1.0, "y": 1.0},
                    {"x": 0.0, "y": 1.0},
                    {"x": 0.0, "y": 0.0}
                ]
            },
            "SMUSERID": 0
        });
        let feature: Feature = serde_json::from_value(raw).unwrap();
        assert_eq!(feature.id, 42);
        assert_eq!(feature.geometry.parts, vec![5]);
        assert_eq!(feature.geometry.points.len(), 5);
        assert_eq!(feature.geometry.kind.as_deref(), Some("REGION"));
        assert_eq!(feature.attribute("yjjbntmj"), Some(&json!("1532.7")));
        assert_eq!(feature.extra.get("SMUSERID"), Some(&json!(0)));
    }

    #[test]
    fn missing_id_is_rejected() {
        let raw = json!({"geometry": {"parts": [1], "points": [{"x": 0.0, "y": 0.0}]}});
        assert!(serde_json::from_value::<Feature>(raw).is_err());
    }

    #[test]
    fn negative_part_length_is_rejected() {
        let raw = json!({"ID": 1, "geometry": {"parts": [-5], "points": []}});
        assert!(serde_json::from_value::<Feature>(raw).is_err());
    }

    #[test]
    fn single_ring_geometry_declares_one_part() {
        let geom = FeatureGeometry::single_ring(vec![RawPoint::new(0.0, 0.0); 4]);
        assert_eq!(geom.parts, vec![4]);
    }
}
