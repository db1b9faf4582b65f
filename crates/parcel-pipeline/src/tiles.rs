//! Rectangle sources: tile files and grid tiling of boundary polygons.
//!
//! A tile file is a GeoJSON `FeatureCollection` of polygons. Each tile's
//! bounding box becomes one [`QueryRectangle`] identified by the tile's
//! `tile_id` property, or by its 1-based position when the property is
//! absent. [`grid_tiles`] produces such files from a boundary: square
//! cells over the boundary's bounding box, kept when they intersect it.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use geo::{BoundingRect, Intersects};
use geo_types::{coord, LineString, MultiPolygon, Polygon, Rect};
use parcel_core::{FeatureCollection, GeoFeature, GeoGeometry, ParcelPolygon, QueryRectangle, EPSG_CODE};
use serde_json::{Map, Value};

use crate::error::TileError;

/// Tile identifier property.
pub const TILE_ID_PROPERTY: &str = "tile_id";

/// Upper bound on grid cells examined by one [`grid_tiles`] call.
pub const MAX_TILE_CANDIDATES: u64 = 4_000_000;

/// One grid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    pub id: u64,
    pub bounds: Rect<f64>,
}

impl Tile {
    /// Query rectangle spanning this tile, corners as (min, min)-(max, max).
    pub fn rectangle(&self, expected_count: u32) -> QueryRectangle {
        let (min, max) = (self.bounds.min(), self.bounds.max());
        QueryRectangle::new(min.x, min.y, max.x, max.y)
            .with_id(self.id)
            .with_expected_count(expected_count)
    }
}

/// Read a tile file into query rectangles, in file order.
pub fn load_tile_rectangles(
    path: &Path,
    expected_count: u32,
) -> Result<Vec<QueryRectangle>, TileError> {
    let collection = read_collection(path)?;
    collection
        .features
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            let fail = |reason: String| TileError::Feature {
                path: path.to_path_buf(),
                index,
                reason,
            };
            let geometry = feature
                .geometry
                .as_ref()
                .ok_or_else(|| fail("missing geometry".into()))?;
            let rect = geometry
                .to_multi_polygon()
                .map_err(|e| fail(e.to_string()))?
                .bounding_rect()
                .ok_or_else(|| fail("empty geometry".into()))?;
            let id = match feature.property(TILE_ID_PROPERTY) {
                Some(value) => tile_id(value)
                    .ok_or_else(|| fail(format!("{TILE_ID_PROPERTY} {value} is not an integer")))?,
                None => index as u64 + 1,
            };
            Ok(Tile { id, bounds: rect }.rectangle(expected_count))
        })
        .collect()
}

fn tile_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read boundary polygons from a GeoJSON file or, for `.shp` paths, a
/// polygon Shapefile.
pub fn load_boundary(path: &Path) -> Result<MultiPolygon<f64>, TileError> {
    let is_shp = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"));
    let polygons = if is_shp {
        read_shapefile_polygons(path)?
    } else {
        read_geojson_polygons(path)?
    };
    if polygons.is_empty() {
        return Err(TileError::EmptyBoundary(path.to_path_buf()));
    }
    Ok(MultiPolygon::new(polygons))
}

fn read_geojson_polygons(path: &Path) -> Result<Vec<Polygon<f64>>, TileError> {
    let collection = read_collection(path)?;
    let mut polygons = Vec::new();
    for (index, feature) in collection.features.iter().enumerate() {
        match &feature.geometry {
            Some(GeoGeometry::Unsupported) | None => {
                tracing::warn!(index, path = %path.display(), "skipping non-polygonal boundary feature");
            }
            Some(geometry) => {
                let parcels = geometry.to_parcels().map_err(|e| TileError::Feature {
                    path: path.to_path_buf(),
                    index,
                    reason: e.to_string(),
                })?;
                polygons.extend(parcels.iter().map(ParcelPolygon::to_polygon));
            }
        }
    }
    Ok(polygons)
}

/// Outer rings start a new polygon; inner rings attach to the last one.
fn read_shapefile_polygons(path: &Path) -> Result<Vec<Polygon<f64>>, TileError> {
    let shapes = shapefile::read_shapes_as::<_, shapefile::Polygon>(path).map_err(|source| {
        TileError::Shapefile {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let mut polygons = Vec::new();
    for shape in &shapes {
        let mut current: Option<(LineString<f64>, Vec<LineString<f64>>)> = None;
        for ring in shape.rings() {
            let line: LineString<f64> = ring.points().iter().map(|p| (p.x, p.y)).collect();
            match ring {
                shapefile::PolygonRing::Outer(_) => {
                    if let Some((exterior, holes)) = current.take() {
                        polygons.push(Polygon::new(exterior, holes));
                    }
                    current = Some((line, Vec::new()));
                }
                shapefile::PolygonRing::Inner(_) => match current.as_mut() {
                    Some((_, holes)) => holes.push(line),
                    None => tracing::warn!(path = %path.display(), "inner ring before any outer ring, skipped"),
                },
            }
        }
        if let Some((exterior, holes)) = current {
            polygons.push(Polygon::new(exterior, holes));
        }
    }
    Ok(polygons)
}

/// Square tiles of `tile_size` degrees intersecting `boundary`, numbered
/// from 1 in column-major order (west to east, then south to north).
pub fn grid_tiles(boundary: &MultiPolygon<f64>, tile_size: f64) -> Result<Vec<Tile>, TileError> {
    if !(tile_size.is_finite() && tile_size > 0.0) {
        return Err(TileError::InvalidTileSize(tile_size));
    }
    let Some(extent) = boundary.bounding_rect() else {
        return Ok(Vec::new());
    };
    let (min, max) = (extent.min(), extent.max());
    let too_many = || TileError::TooManyTiles {
        tile_size,
        limit: MAX_TILE_CANDIDATES,
    };
    let columns = cells(max.x - min.x, tile_size).ok_or_else(too_many)?;
    let rows = cells(max.y - min.y, tile_size).ok_or_else(too_many)?;
    let candidates = columns
        .checked_mul(rows)
        .filter(|n| *n <= MAX_TILE_CANDIDATES)
        .ok_or_else(too_many)?;

    let mut tiles = Vec::new();
    for col in 0..columns {
        let x = min.x + col as f64 * tile_size;
        for row in 0..rows {
            let y = min.y + row as f64 * tile_size;
            let bounds = Rect::new(
                coord! { x: x, y: y },
                coord! { x: x + tile_size, y: y + tile_size },
            );
            if boundary.intersects(&bounds.to_polygon()) {
                tiles.push(Tile {
                    id: tiles.len() as u64 + 1,
                    bounds,
                });
            }
        }
    }
    tracing::info!(
        candidates,
        kept = tiles.len(),
        tile_size,
        "grid tiling complete"
    );
    Ok(tiles)
}

/// Number of cells of `size` needed to cover `span`; a degenerate span
/// still gets one cell. The epsilon absorbs rounding in `max - min` so an
/// exact multiple does not grow an extra row of edge-touching tiles.
/// `None` when the count is not finite or exceeds [`MAX_TILE_CANDIDATES`].
fn cells(span: f64, size: f64) -> Option<u64> {
    let count = (span / size - 1e-9).ceil();
    if !count.is_finite() || count > MAX_TILE_CANDIDATES as f64 {
        return None;
    }
    Some((count as u64).max(1))
}

/// Write tiles as a GeoJSON tile file.
pub fn write_tiles(path: &Path, tiles: &[Tile]) -> Result<(), TileError> {
    let mut collection = FeatureCollection::with_epsg(EPSG_CODE);
    collection.features = tiles
        .iter()
        .map(|tile| {
            let ring = tile.bounds.to_polygon().exterior().clone();
            let geometry = GeoGeometry::from_parcel(&ParcelPolygon::new(ring, Vec::new()));
            let mut properties = Map::new();
            properties.insert(TILE_ID_PROPERTY.to_string(), Value::from(tile.id));
            GeoFeature::new(geometry, properties)
        })
        .collect();

    let io_err = |source| TileError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer(&mut writer, &collection).map_err(|source| TileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)
}

fn read_collection(path: &Path) -> Result<FeatureCollection, TileError> {
    let file = File::open(path).map_err(|source| TileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| TileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_json(dir: &TempDir, name: &str, value: Value) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn tile_file_uses_tile_id_or_position() {
        let dir = TempDir::new().unwrap();
        let path = write_json(
            &dir,
            "tiles.geojson",
            json!({
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "properties": { "tile_id": 17 },
                        "geometry": { "type": "Polygon", "coordinates": [[[1,2],[3,2],[3,5],[1,5],[1,2]]] }
                    },
                    {
                        "type": "Feature",
                        "properties": {},
                        "geometry": { "type": "MultiPolygon", "coordinates": [
                            [[[10,10],[11,10],[11,11],[10,10]]],
                            [[[12,9],[13,9],[13,10],[12,9]]]
                        ] }
                    }
                ]
            }),
        );

        let rects = load_tile_rectangles(&path, 500).unwrap();
        assert_eq!(rects.len(), 2);
        assert_eq!(rects[0].id, Some(17));
        assert_eq!((rects[0].x1, rects[0].y1, rects[0].x2, rects[0].y2), (1.0, 2.0, 3.0, 5.0));
        assert_eq!(rects[0].expected_count, 500);
        assert_eq!(rects[1].id, Some(2));
        assert_eq!((rects[1].x1, rects[1].y1, rects[1].x2, rects[1].y2), (10.0, 9.0, 13.0, 11.0));
    }

    #[test]
    fn tile_without_geometry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_json(
            &dir,
            "tiles.geojson",
            json!({ "type": "FeatureCollection", "features": [
                { "type": "Feature", "properties": { "tile_id": 1 }, "geometry": null }
            ] }),
        );
        assert!(matches!(
            load_tile_rectangles(&path, 1000),
            Err(TileError::Feature { index: 0, .. })
        ));
    }

    #[test]
    fn grid_keeps_only_intersecting_tiles() {
        // L-shaped boundary over a 2x2 grid of unit tiles: the top-right
        // cell lies outside.
        let boundary = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (2.0, 0.0),
                (2.0, 0.9),
                (0.9, 0.9),
                (0.9, 2.0),
                (0.0, 2.0),
                (0.0, 0.0),
            ]),
            vec![],
        )]);
        let tiles = grid_tiles(&boundary, 1.0).unwrap();
        assert_eq!(tiles.len(), 3);
        assert_eq!(tiles.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(tiles
            .iter()
            .all(|t| !(t.bounds.min().x == 1.0 && t.bounds.min().y == 1.0)));
    }

    #[test]
    fn grid_rejects_bad_tile_size() {
        let boundary = MultiPolygon::new(vec![]);
        assert!(matches!(
            grid_tiles(&boundary, 0.0),
            Err(TileError::InvalidTileSize(_))
        ));
        assert!(grid_tiles(&boundary, 0.5).unwrap().is_empty());
    }

    #[test]
    fn grid_rejects_tile_size_that_explodes_the_grid() {
        let boundary = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(97.5, 21.1), (106.2, 21.1), (106.2, 29.2), (97.5, 21.1)]),
            vec![],
        )]);
        for size in [1e-300, f64::MIN_POSITIVE, 1e-4] {
            assert!(matches!(
                grid_tiles(&boundary, size),
                Err(TileError::TooManyTiles { limit: MAX_TILE_CANDIDATES, .. })
            ));
        }
        // A realistic size over the same extent still tiles.
        assert!(!grid_tiles(&boundary, 0.5).unwrap().is_empty());
    }

    #[test]
    fn cell_count_is_bounded() {
        assert_eq!(cells(1.0, 0.5), Some(2));
        assert_eq!(cells(0.0, 0.5), Some(1));
        assert_eq!(cells(1.0, 1e-300), None);
        assert_eq!(cells(f64::INFINITY, 1.0), None);
    }

    #[test]
    fn written_tiles_load_back_as_rectangles() {
        let dir = TempDir::new().unwrap();
        let boundary_path = write_json(
            &dir,
            "province.geojson",
            json!({ "type": "FeatureCollection", "features": [{
                "type": "Feature",
                "properties": { "NAME": "test" },
                "geometry": { "type": "Polygon", "coordinates": [[[100,20],[100.1,20],[100.1,20.05],[100,20.05],[100,20]]] }
            }] }),
        );
        let boundary = load_boundary(&boundary_path).unwrap();
        let tiles = grid_tiles(&boundary, 0.05).unwrap();
        assert_eq!(tiles.len(), 2);

        let out = dir.path().join("tiles/province.geojson");
        write_tiles(&out, &tiles).unwrap();
        let rects = load_tile_rectangles(&out, 1000).unwrap();
        assert_eq!(rects.len(), 2);
        assert_eq!(rects[0].id, Some(1));
        assert!((rects[0].x1 - 100.0).abs() < 1e-9);
        assert!((rects[1].x1 - 100.05).abs() < 1e-9);
    }

    #[test]
    fn boundary_without_polygons_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_json(
            &dir,
            "empty.geojson",
            json!({ "type": "FeatureCollection", "features": [] }),
        );
        assert!(matches!(load_boundary(&path), Err(TileError::EmptyBoundary(_))));
    }
}
