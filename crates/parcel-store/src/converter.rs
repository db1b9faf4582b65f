//! Store → ESRI Shapefile conversion.
//!
//! Every record is copied with its geometry and properties. The attribute
//! table schema is inferred from the store's properties:
//!
//! | JSON values          | dBase field          |
//! |----------------------|----------------------|
//! | integers only        | `N(18,0)`            |
//! | any non-integer num. | `N(24,15)`           |
//! | integers past ±2^53  | `C(254)`, exact text |
//! | booleans only        | `L`                  |
//! | anything else        | `C(254)`             |
//!
//! Fields are emitted `ID` first, then in sorted key order. dBase limits
//! field names to 10 bytes; longer names are truncated and a collision
//! after truncation is an error.
//!
//! Alongside `.shp/.shx/.dbf` the converter writes a `.prj` with the
//! CGCS2000 geographic WKT and a `.cpg` declaring UTF-8 attributes.
//!
//! All five files are first written into a scratch directory beside the
//! target and only moved into place once every record has been written,
//! so a failed conversion leaves no partial shapefile behind.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use geo_types::LineString;
use parcel_core::{FeatureCollection, GeoGeometry, ParcelPolygon, EPSG_CODE, ID_PROPERTY};
use serde_json::Value;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing};
use tempfile::TempDir;

use crate::error::{ConvertError, StoreError};

/// ESRI WKT for CGCS2000 geographic coordinates.
pub const CGCS2000_PRJ: &str = "GEOGCS[\"GCS_China_Geodetic_Coordinate_System_2000\",\
DATUM[\"D_China_2000\",SPHEROID[\"CGCS2000\",6378137.0,298.257222101]],\
PRIMEM[\"Greenwich\",0.0],UNIT[\"Degree\",0.0174532925199433]]";

const MAX_FIELD_NAME: usize = 10;
const CHARACTER_WIDTH: u8 = 254;

/// Largest magnitude a dBase numeric (stored as f64) holds exactly.
const MAX_EXACT_INTEGER: u64 = 1 << 53;

/// Files making up one converted shapefile.
const COMPONENTS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

/// dBase column type chosen for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Character,
    Logical,
}

impl FieldKind {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(FieldKind::Logical),
            Value::Number(n) if n.is_i64() || n.is_u64() => {
                let magnitude = n
                    .as_i64()
                    .map(i64::unsigned_abs)
                    .or_else(|| n.as_u64())
                    .unwrap_or(u64::MAX);
                if magnitude <= MAX_EXACT_INTEGER {
                    Some(FieldKind::Integer)
                } else {
                    Some(FieldKind::Character)
                }
            }
            Value::Number(_) => Some(FieldKind::Float),
            _ => Some(FieldKind::Character),
        }
    }

    fn merge(self, other: Self) -> Self {
        use FieldKind::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Character,
        }
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    pub records: usize,
    /// `(dBase field name, source property, kind)` in table order.
    pub fields: Vec<(String, String, FieldKind)>,
    pub shapefile: PathBuf,
}

/// Convert the store at `source` into a Shapefile at `target`.
///
/// Returns `Ok(None)` without touching the filesystem when either path is
/// unset.
pub fn convert(
    source: Option<&Path>,
    target: Option<&Path>,
) -> Result<Option<ConversionReport>, ConvertError> {
    let (Some(source), Some(target)) = (source, target) else {
        tracing::debug!("conversion skipped: source or target not configured");
        return Ok(None);
    };
    convert_store(source, target).map(Some)
}

fn convert_store(source: &Path, target: &Path) -> Result<ConversionReport, ConvertError> {
    let collection = read_collection(source)?;
    if let Some(code) = collection.crs.as_ref().and_then(|c| c.epsg_code()) {
        if code != EPSG_CODE {
            return Err(ConvertError::ReferenceSystem { found: code });
        }
    }

    let schema = infer_schema(&collection)?;
    let mut table = TableWriterBuilder::new();
    for column in &schema {
        let name = FieldName::try_from(column.field.as_str()).map_err(|e| ConvertError::Field {
            name: column.field.clone(),
            reason: format!("{e:?}"),
        })?;
        table = match column.kind {
            FieldKind::Integer => table.add_numeric_field(name, 18, 0),
            FieldKind::Float => table.add_numeric_field(name, 24, 15),
            FieldKind::Logical => table.add_logical_field(name),
            FieldKind::Character => table.add_character_field(name, CHARACTER_WIDTH),
        };
    }

    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    let staging = tempfile::Builder::new()
        .prefix(".parcel-convert")
        .tempdir_in(&dir)
        .map_err(io_error(&dir))?;
    let file_name = target.file_name().ok_or_else(|| ConvertError::Io {
        path: target.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "target has no file name"),
    })?;
    let staged = staging.path().join(file_name);

    let shp_err = |source| ConvertError::Shapefile {
        path: target.to_path_buf(),
        source,
    };
    {
        let mut writer = shapefile::Writer::from_path(&staged, table).map_err(shp_err)?;
        for (index, feature) in collection.features.iter().enumerate() {
            let geometry = feature
                .geometry
                .as_ref()
                .ok_or(ConvertError::UnsupportedGeometry { index })?;
            let shape = to_shape(index, geometry)?;
            let mut record = Record::default();
            for column in &schema {
                let value = feature.property(&column.property).unwrap_or(&Value::Null);
                record.insert(column.field.clone(), field_value(column.kind, value));
            }
            writer
                .write_shape_and_record(&shape, &record)
                .map_err(shp_err)?;
        }
    }

    write_sidecar(&staged.with_extension("prj"), CGCS2000_PRJ)?;
    write_sidecar(&staged.with_extension("cpg"), "UTF-8")?;
    publish(&staging, &staged, target)?;

    let report = ConversionReport {
        records: collection.features.len(),
        fields: schema
            .into_iter()
            .map(|c| (c.field, c.property, c.kind))
            .collect(),
        shapefile: target.to_path_buf(),
    };
    tracing::info!(
        source = %source.display(),
        target = %target.display(),
        records = report.records,
        "store converted to shapefile"
    );
    Ok(report)
}

fn read_collection(source: &Path) -> Result<FeatureCollection, ConvertError> {
    let file = File::open(source).map_err(|e| StoreError::Io {
        path: source.to_path_buf(),
        source: e,
    })?;
    let collection = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        StoreError::Parse {
            path: source.to_path_buf(),
            source: e,
        }
    })?;
    Ok(collection)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ConvertError {
    let path = path.to_path_buf();
    move |source| ConvertError::Io { path, source }
}

/// Move every staged component over its counterpart beside `target`.
/// The `.shp` itself keeps whatever name the target was given.
fn publish(staging: &TempDir, staged: &Path, target: &Path) -> Result<(), ConvertError> {
    for ext in COMPONENTS {
        let (from, to) = if ext == "shp" {
            (staged.to_path_buf(), target.to_path_buf())
        } else {
            (staged.with_extension(ext), target.with_extension(ext))
        };
        std::fs::rename(&from, &to).map_err(io_error(&to))?;
    }
    tracing::debug!(staging = %staging.path().display(), "shapefile components published");
    Ok(())
}

fn write_sidecar(path: &Path, contents: &str) -> Result<(), ConvertError> {
    std::fs::write(path, contents).map_err(|source| ConvertError::Io {
        path: path.to_path_buf(),
        source,
    })
}

struct Column {
    field: String,
    property: String,
    kind: FieldKind,
}

fn infer_schema(collection: &FeatureCollection) -> Result<Vec<Column>, ConvertError> {
    let mut kinds: BTreeMap<&str, Option<FieldKind>> = BTreeMap::new();
    for feature in &collection.features {
        for (key, value) in feature.properties.iter().flatten() {
            let slot = kinds.entry(key.as_str()).or_insert(None);
            *slot = match (*slot, FieldKind::of(value)) {
                (Some(a), Some(b)) => Some(a.merge(b)),
                (a, b) => a.or(b),
            };
        }
    }

    let mut ordered: Vec<(&str, FieldKind)> = kinds
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or(FieldKind::Character)))
        .collect();
    ordered.sort_by_key(|(k, _)| *k != ID_PROPERTY);

    let mut columns: Vec<Column> = Vec::with_capacity(ordered.len());
    for (property, kind) in ordered {
        let field = truncate_utf8(property, MAX_FIELD_NAME).to_string();
        if field.is_empty() {
            return Err(ConvertError::Field {
                name: property.to_string(),
                reason: "empty field name".into(),
            });
        }
        if columns.iter().any(|c| c.field == field) {
            return Err(ConvertError::Field {
                name: property.to_string(),
                reason: format!("collides with another property after truncation to {field:?}"),
            });
        }
        columns.push(Column {
            field,
            property: property.to_string(),
            kind,
        });
    }
    Ok(columns)
}

fn field_value(kind: FieldKind, value: &Value) -> FieldValue {
    match kind {
        FieldKind::Integer | FieldKind::Float => FieldValue::Numeric(value.as_f64()),
        FieldKind::Logical => FieldValue::Logical(value.as_bool()),
        FieldKind::Character => FieldValue::Character(match value {
            Value::Null => None,
            Value::String(s) => Some(truncate_utf8(s, CHARACTER_WIDTH as usize).to_string()),
            other => Some(truncate_utf8(&other.to_string(), CHARACTER_WIDTH as usize).to_string()),
        }),
    }
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn to_shape(index: usize, geometry: &GeoGeometry) -> Result<Polygon, ConvertError> {
    let parcels = match geometry {
        GeoGeometry::Unsupported => return Err(ConvertError::UnsupportedGeometry { index }),
        other => other
            .to_parcels()
            .map_err(|source| ConvertError::Geometry { index, source })?,
    };
    let rings = parcels.iter().flat_map(polygon_rings).collect::<Vec<_>>();
    if rings.is_empty() {
        return Err(ConvertError::UnsupportedGeometry { index });
    }
    Ok(Polygon::with_rings(rings))
}

fn polygon_rings(polygon: &ParcelPolygon) -> Vec<PolygonRing<Point>> {
    let mut rings = vec![PolygonRing::Outer(ring_points(polygon.exterior()))];
    rings.extend(
        polygon
            .interiors()
            .iter()
            .map(|r| PolygonRing::Inner(ring_points(r))),
    );
    rings
}

fn ring_points(ring: &LineString<f64>) -> Vec<Point> {
    ring.0.iter().map(|c| Point::new(c.x, c.y)).collect()
}
