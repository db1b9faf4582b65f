//! GeoJSON-backed parcel store with identifier deduplication.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use parcel_core::{
    Feature, FeatureCollection, GeoFeature, GeoGeometry, ParcelPolygon, EPSG_CODE, ID_PROPERTY,
};
use rayon::prelude::*;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::error::StoreError;

/// Features per geometry-construction chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Outcome of one [`ParcelStore::write_features`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// The store file did not exist before this write.
    pub created: bool,
    /// Records added by this write.
    pub appended: usize,
    /// Incoming features dropped because the store already held their ID.
    pub already_present: usize,
    /// Incoming features dropped as repeats of an earlier feature in the batch.
    pub duplicates_in_batch: usize,
    /// Records in the store after the write.
    pub total_records: usize,
}

/// One record read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub polygons: Vec<ParcelPolygon>,
    pub properties: Map<String, Value>,
}

impl StoredRecord {
    /// The first (for records written by this store, the only) polygon.
    pub fn polygon(&self) -> Option<&ParcelPolygon> {
        self.polygons.first()
    }
}

/// Append-only parcel store at a single file path.
#[derive(Debug, Clone)]
pub struct ParcelStore {
    path: PathBuf,
    chunk_size: usize,
    workers: usize,
}

impl ParcelStore {
    /// Store handle for `path`. Nothing is read or created until the first
    /// operation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            path: path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the whole document. A missing file reads as an empty collection.
    pub fn load(&self) -> Result<FeatureCollection, StoreError> {
        if !self.exists() {
            return Ok(FeatureCollection::with_epsg(EPSG_CODE));
        }
        let file = File::open(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Identifiers currently in the store. Rebuilt from disk on every call.
    pub fn existing_ids(&self) -> Result<HashSet<i64>, StoreError> {
        let collection = self.load()?;
        self.ids_of(&collection)
    }

    /// Every record with its geometry rebuilt.
    pub fn records(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let collection = self.load()?;
        collection
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                let id = record_id(feature).ok_or_else(|| StoreError::MissingId {
                    path: self.path.clone(),
                    index,
                })?;
                let polygons = match &feature.geometry {
                    Some(geometry) => geometry
                        .to_parcels()
                        .map_err(|source| StoreError::Geometry { id, source })?,
                    None => Vec::new(),
                };
                Ok(StoredRecord {
                    id,
                    polygons,
                    properties: feature.properties.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Append every feature whose identifier is not yet stored.
    pub fn write_features(&self, features: &[Feature]) -> Result<WriteReport, StoreError> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let created = !self.exists();
        let mut collection = self.load()?;
        let stored = self.ids_of(&collection)?;

        let mut report = WriteReport {
            created,
            ..WriteReport::default()
        };
        let mut batch_seen = HashSet::with_capacity(features.len());
        let mut fresh: Vec<&Feature> = Vec::with_capacity(features.len());
        for feature in features {
            if stored.contains(&feature.id) {
                report.already_present += 1;
            } else if !batch_seen.insert(feature.id) {
                report.duplicates_in_batch += 1;
            } else {
                fresh.push(feature);
            }
        }

        if fresh.is_empty() && !created {
            report.total_records = collection.features.len();
            tracing::info!(
                path = %self.path.display(),
                already_present = report.already_present,
                "no new features to store"
            );
            return Ok(report);
        }

        let built = self.build_features(&fresh)?;
        report.appended = built.len();
        collection.features.extend(built);
        if collection.crs.is_none() {
            collection.crs = FeatureCollection::with_epsg(EPSG_CODE).crs;
        }
        report.total_records = collection.features.len();

        self.commit(&collection)?;
        tracing::info!(
            path = %self.path.display(),
            created = report.created,
            appended = report.appended,
            already_present = report.already_present,
            duplicates_in_batch = report.duplicates_in_batch,
            total = report.total_records,
            "store updated"
        );
        Ok(report)
    }

    fn ids_of(&self, collection: &FeatureCollection) -> Result<HashSet<i64>, StoreError> {
        collection
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                record_id(feature).ok_or_else(|| StoreError::MissingId {
                    path: self.path.clone(),
                    index,
                })
            })
            .collect()
    }

    /// Reconstruct geometries on a pool scoped to this call.
    fn build_features(&self, fresh: &[&Feature]) -> Result<Vec<GeoFeature>, StoreError> {
        if fresh.is_empty() {
            return Ok(Vec::new());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| StoreError::WorkerPool(e.to_string()))?;

        let chunks: Vec<Vec<GeoFeature>> = pool.install(|| {
            fresh
                .par_chunks(self.chunk_size)
                .map(|chunk| chunk.iter().map(|f| to_geo_feature(f)).collect::<Result<Vec<_>, _>>())
                .collect::<Result<_, StoreError>>()
        })?;
        Ok(chunks.into_iter().flatten().collect())
    }

    /// Write to a sibling temp file, then rename over the target.
    fn commit(&self, collection: &FeatureCollection) -> Result<(), StoreError> {
        let dir = self.parent_dir();
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, collection).map_err(|source| {
                StoreError::Serialize {
                    path: self.path.clone(),
                    source,
                }
            })?;
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

fn to_geo_feature(feature: &Feature) -> Result<GeoFeature, StoreError> {
    let polygon = feature
        .geometry
        .to_polygon()
        .map_err(|source| StoreError::Geometry {
            id: feature.id,
            source,
        })?;
    let mut properties = Map::new();
    properties.insert(ID_PROPERTY.to_string(), Value::from(feature.id));
    let mut out = GeoFeature::new(GeoGeometry::from_parcel(&polygon), properties);
    out.id = Some(Value::String(feature.id.to_string()));
    Ok(out)
}

/// Integer identifier of a stored feature: the `ID` property, falling back
/// to the feature-level `id`.
fn record_id(feature: &GeoFeature) -> Option<i64> {
    feature
        .property(ID_PROPERTY)
        .and_then(value_as_id)
        .or_else(|| feature.id.as_ref().and_then(value_as_id))
}

fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
