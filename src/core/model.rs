//! Value types flowing through one pipeline run:
//! `CatalogRecord` → `Scene` → `RetrievedAsset` → `Mosaic` → `OutputProduct`.
//! Each stage consumes the previous value and produces a new one.
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::TempPath;

use crate::error::{Error, Result};
use crate::types::{ProductKind, ProviderKind};

/// One catalog hit.
#[derive(Debug, Clone)]
pub struct CatalogRecord {
    pub id: String,
    pub provider: ProviderKind,
    pub acquired: DateTime<Utc>,
    pub footprint: MultiPolygon<f64>,
    /// Item type, sensor model or product line; keys the band map.
    pub product_type: String,
    /// Physical platform that captured the image (satellite id).
    pub sensor_instance: String,
    /// Percent.
    pub cloud_cover: Option<f64>,
    /// Meters per pixel.
    pub resolution: Option<f64>,
    pub epsg_code: Option<u32>,
    pub thumbnail: Option<String>,
    /// Provider fields not modelled above.
    pub extra: Map<String, Value>,
}

impl CatalogRecord {
    pub fn date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }

    pub fn summary(&self, asset_type: &str) -> RecordSummary {
        RecordSummary {
            provider: self.provider,
            id: self.id.clone(),
            timestamp: self.acquired,
            clouds: self.cloud_cover,
            resolution: self.resolution,
            sensor: self.sensor_instance.clone(),
            product_type: self.product_type.clone(),
            asset_type: asset_type.to_string(),
            epsg_code: self.epsg_code,
            thumbnail: self.thumbnail.clone(),
        }
    }
}

/// Cleaned, serializable view of a record, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub provider: ProviderKind,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub clouds: Option<f64>,
    pub resolution: Option<f64>,
    pub sensor: String,
    pub product_type: String,
    pub asset_type: String,
    pub epsg_code: Option<u32>,
    pub thumbnail: Option<String>,
}

/// Records that jointly fill one image slot.
#[derive(Debug, Clone)]
pub struct Scene {
    pub records: Vec<CatalogRecord>,
    /// Newest-first stand-ins, each able to fill the slot alone, tried when
    /// none of `records` can be retrieved.
    pub alternates: Vec<CatalogRecord>,
}

impl Scene {
    pub fn new(records: Vec<CatalogRecord>) -> Self {
        Self {
            records,
            alternates: Vec::new(),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    /// Acquisition date of the newest member.
    pub fn date(&self) -> Option<NaiveDate> {
        self.records.iter().map(CatalogRecord::date).max()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A downloaded file in the staging directory. Removed on drop unless
/// persisted, so abandoned downloads never outlive their task.
#[derive(Debug)]
pub struct StagedFile {
    pub record_id: String,
    pub path: TempPath,
}

impl StagedFile {
    pub fn new<P: Into<PathBuf>>(record_id: &str, path: P) -> Self {
        Self {
            record_id: record_id.to_string(),
            path: TempPath::from_path(path.into()),
        }
    }
}

/// A scene after download: each surviving record paired with its raster.
#[derive(Debug)]
pub struct RetrievedAsset {
    pub components: Vec<(CatalogRecord, TempPath)>,
}

impl RetrievedAsset {
    /// Pair staged files with the scene's records, in scene order, then with
    /// any alternates retrieved in their place. Records without a file were
    /// dropped during retrieval.
    pub fn assemble(scene: Scene, mut staged: Vec<StagedFile>) -> Result<Self> {
        let ids = scene.ids();
        let mut components = Vec::with_capacity(staged.len());
        for record in scene.records.into_iter().chain(scene.alternates) {
            if let Some(pos) = staged.iter().position(|s| s.record_id == record.id) {
                let file = staged.swap_remove(pos);
                components.push((record, file.path));
            }
        }
        if components.is_empty() {
            return Err(Error::NoAssets { ids });
        }
        Ok(Self { components })
    }

    pub fn records(&self) -> impl Iterator<Item = &CatalogRecord> {
        self.components.iter().map(|(r, _)| r)
    }
}

/// One finished raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputProduct {
    pub kind: ProductKind,
    /// Style or index name; `raw` for the unstyled mosaic.
    pub name: String,
    pub path: PathBuf,
}

/// What a completed scene hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub component_records: Vec<RecordSummary>,
    pub products: Vec<OutputProduct>,
}

impl SceneRecord {
    pub fn paths(&self) -> Vec<&Path> {
        self.products.iter().map(|p| p.path.as_path()).collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::geometry::BoundingBox;
    use chrono::TimeZone;

    /// Record acquired `days_ago` days before 2024-06-30 with a rectangular footprint.
    pub fn record(id: &str, days_ago: i64, footprint: (f64, f64, f64, f64)) -> CatalogRecord {
        let base = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        CatalogRecord {
            id: id.to_string(),
            provider: ProviderKind::Planet,
            acquired: base - chrono::Duration::days(days_ago),
            footprint: BoundingBox::new(footprint.0, footprint.1, footprint.2, footprint.3)
                .unwrap()
                .to_multi_polygon(),
            product_type: "PSScene4Band".into(),
            sensor_instance: "0f12".into(),
            cloud_cover: Some(1.0),
            resolution: Some(3.0),
            epsg_code: Some(32633),
            thumbnail: None,
            extra: Map::new(),
        }
    }
}
