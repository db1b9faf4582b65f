//! # GeoJSON Document Types
//!
//! Minimal, typed GeoJSON model covering what the pipeline reads and
//! writes: feature collections with an optional named CRS member, and
//! Polygon / MultiPolygon geometries. Other geometry types deserialize to
//! [`GeoGeometry::Unsupported`] so that a mixed file can still be read.
//!
//! Positions are kept as `Vec<f64>` to accept 3D input; only the first two
//! ordinates are used.

use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GeometryError;
use crate::geometry::ParcelPolygon;

/// A GeoJSON position (`[x, y]` or `[x, y, z]`).
pub type Position = Vec<f64>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionType {
    #[default]
    FeatureCollection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    #[default]
    Feature,
}

/// Legacy GeoJSON `crs` member naming a reference system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCrs {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: CrsProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrsProperties {
    pub name: String,
}

impl NamedCrs {
    /// `urn:ogc:def:crs:EPSG::<code>` style CRS member.
    pub fn epsg(code: u32) -> Self {
        Self {
            kind: "name".into(),
            properties: CrsProperties {
                name: format!("urn:ogc:def:crs:EPSG::{code}"),
            },
        }
    }

    /// Extract the EPSG code from `urn:ogc:def:crs:EPSG::4490` or `EPSG:4490`.
    pub fn epsg_code(&self) -> Option<u32> {
        let name = self.properties.name.as_str();
        let idx = name.rfind(|c: char| c == ':')?;
        if !name[..idx].to_ascii_uppercase().contains("EPSG") {
            return None;
        }
        name[idx + 1..].parse().ok()
    }
}

/// Polygonal GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoGeometry {
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    #[serde(other)]
    Unsupported,
}

fn ring_to_positions(ring: &LineString<f64>) -> Vec<Position> {
    ring.0.iter().map(|c| vec![c.x, c.y]).collect()
}

fn positions_to_ring(positions: &[Position]) -> Result<LineString<f64>, GeometryError> {
    positions
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            other => Err(GeometryError::InvalidPosition(other.len())),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

fn rings_to_parcel(rings: &[Vec<Position>]) -> Result<ParcelPolygon, GeometryError> {
    let mut iter = rings.iter();
    let exterior = positions_to_ring(iter.next().ok_or(GeometryError::NoParts)?)?;
    let interiors = iter
        .map(|r| positions_to_ring(r))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ParcelPolygon::new(exterior, interiors))
}

impl GeoGeometry {
    /// Polygon geometry with rings copied verbatim.
    pub fn from_parcel(polygon: &ParcelPolygon) -> Self {
        GeoGeometry::Polygon {
            coordinates: polygon.rings().map(ring_to_positions).collect(),
        }
    }

    /// Every polygon in this geometry, rings preserved as written.
    pub fn to_parcels(&self) -> Result<Vec<ParcelPolygon>, GeometryError> {
        match self {
            GeoGeometry::Polygon { coordinates } => Ok(vec![rings_to_parcel(coordinates)?]),
            GeoGeometry::MultiPolygon { coordinates } => coordinates
                .iter()
                .map(|rings| rings_to_parcel(rings))
                .collect(),
            GeoGeometry::Unsupported => Err(GeometryError::Unsupported("non-polygonal".into())),
        }
    }

    /// Convert into a `geo_types::MultiPolygon` for spatial predicates.
    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>, GeometryError> {
        let polygons: Vec<Polygon<f64>> = self
            .to_parcels()?
            .iter()
            .map(ParcelPolygon::to_polygon)
            .collect();
        Ok(MultiPolygon::new(polygons))
    }
}

/// One GeoJSON feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFeature {
    #[serde(rename = "type")]
    pub kind: FeatureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    pub geometry: Option<GeoGeometry>,
}

impl GeoFeature {
    pub fn new(geometry: GeoGeometry, properties: Map<String, Value>) -> Self {
        Self {
            kind: FeatureType::Feature,
            id: None,
            properties: Some(properties),
            geometry: Some(geometry),
        }
    }

    /// Property lookup that tolerates a null `properties` member.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.as_ref().and_then(|p| p.get(key))
    }
}

/// A GeoJSON feature collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: CollectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<NamedCrs>,
    #[serde(default)]
    pub features: Vec<GeoFeature>,
}

impl FeatureCollection {
    /// Empty collection declared in the given EPSG reference system.
    pub fn with_epsg(code: u32) -> Self {
        Self {
            kind: CollectionType::FeatureCollection,
            crs: Some(NamedCrs::epsg(code)),
            features: Vec::new(),
        }
    }
}
