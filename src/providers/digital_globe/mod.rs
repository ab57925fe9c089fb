//! DigitalGlobe: large strips, one record per scene, imagery served
//! pre-activated as an AOI GeoTIFF in the requested projection.
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{Array3, Axis, Zip};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::model::{CatalogRecord, Scene, StagedFile};
use crate::core::processing::histogram::HistogramStats;
use crate::core::scenes::{CompileParams, compile_single_record};
use crate::core::specs::ImageSpecs;
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, overlap, projection};
use crate::io::RasterReader;
use crate::io::writers::write_tiff_stack;
use crate::providers::{Provider, http, unknown_band_map};
use crate::types::ProviderKind;

pub mod client;

pub use client::{AoiRequest, DgApi, DgClient, DgRecord, DgSearch};

pub const KNOWN_IMAGE_SOURCES: [&str; 5] = [
    "WORLDVIEW02",
    "WORLDVIEW03_VNIR",
    "GEOEYE01",
    "QUICKBIRD02",
    "IKONOS",
];

/// Total band count of a sensor's multispectral product.
pub fn sensor_bands(sensor: &str) -> Option<u32> {
    match sensor {
        "WORLDVIEW02" | "WORLDVIEW03_VNIR" => Some(8),
        "GEOEYE01" | "QUICKBIRD02" | "IKONOS" => Some(4),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DgSettings {
    pub image_source: Vec<String>,
    /// Upper bound on the off-nadir angle, degrees.
    #[serde(rename = "offNadirAngle")]
    pub off_nadir_angle: Option<f64>,
    pub band_type: String,
    /// Pansharpen when the bbox's mean side is below this, km.
    pub pansharp_scale: f64,
    pub acomp: bool,
    pub override_proj: Option<String>,
    pub catalog_url: String,
    pub imagery_url: String,
    /// Per-band percentile mapped to `expand_target` after download.
    pub expand_percentile: f64,
    pub expand_target: f64,
}

impl Default for DgSettings {
    fn default() -> Self {
        Self {
            image_source: vec![
                "WORLDVIEW02".into(),
                "WORLDVIEW03_VNIR".into(),
                "GEOEYE01".into(),
            ],
            off_nadir_angle: None,
            band_type: "MS".into(),
            pansharp_scale: 2.5,
            acomp: false,
            override_proj: None,
            catalog_url: client::DEFAULT_CATALOG_URL.into(),
            imagery_url: client::DEFAULT_IMAGERY_URL.into(),
            expand_percentile: 97.0,
            expand_target: 8000.0,
        }
    }
}

impl DgSettings {
    pub fn from_specs(specs: &ImageSpecs) -> Result<Self> {
        let settings: Self = specs.provider_settings()?;
        if settings.image_source.is_empty() {
            return Err(Error::config("image_source must not be empty"));
        }
        if let Some(bad) = settings
            .image_source
            .iter()
            .find(|s| !KNOWN_IMAGE_SOURCES.contains(&s.as_str()))
        {
            return Err(Error::config(format!("unknown image source '{}'", bad)));
        }
        if settings.band_type != "MS" {
            return Err(Error::config(format!(
                "unsupported band_type '{}'",
                settings.band_type
            )));
        }
        if !(0.0..=100.0).contains(&settings.expand_percentile) || settings.expand_target <= 0.0 {
            return Err(Error::config("expand_percentile/expand_target out of range"));
        }
        Ok(settings)
    }

    /// Catalog filter predicates.
    pub fn filters(&self, specs: &ImageSpecs) -> Vec<String> {
        let sensors = self
            .image_source
            .iter()
            .map(|s| format!("sensorPlatformName = '{}'", s))
            .collect::<Vec<_>>()
            .join(" OR ");
        let mut filters = vec![
            format!("({})", sensors),
            format!("cloudCover < {}", specs.clouds as i64),
        ];
        if let Some(angle) = self.off_nadir_angle {
            filters.push(format!("offNadirAngle < {}", angle));
        }
        filters
    }
}

/// Roughly normalize a freshly delivered raster: per band, map the given
/// percentile of the nonzero pixels to `target` and store as `u16`.
/// Deliveries vary in dtype and band weighting between sensors; this puts
/// them on the value range the color stage expects.
pub fn expand_histogram(path: &Path, percentile: f64, target: f64) -> Result<()> {
    let (stack, georef) = {
        let reader = RasterReader::open(path)?;
        (reader.read_stack()?, reader.georef().clone())
    };
    let mut out = Array3::<u16>::zeros(stack.dim());
    for (src, mut dst) in stack.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        let stats = HistogramStats::of_array(&src);
        let cut = stats.percentile(percentile);
        if stats.is_empty() || cut <= 0.0 {
            continue;
        }
        Zip::from(&mut dst).and(&src).for_each(|d, &s| {
            *d = (s / cut * target).round().clamp(0.0, f64::from(u16::MAX)) as u16;
        });
    }
    write_tiff_stack(path, &out, &georef)?;
    Ok(())
}

pub struct DigitalGlobeProvider {
    api: Arc<dyn DgApi>,
    specs: ImageSpecs,
    settings: DgSettings,
}

impl DigitalGlobeProvider {
    pub fn new(api: Arc<dyn DgApi>, specs: &ImageSpecs) -> Result<Self> {
        Ok(Self {
            api,
            specs: specs.clone(),
            settings: DgSettings::from_specs(specs)?,
        })
    }

    /// Client authenticated with `DG_API_TOKEN`.
    pub fn from_env(specs: &ImageSpecs) -> Result<Self> {
        let settings = DgSettings::from_specs(specs)?;
        let api = DgClient::new(
            &settings.catalog_url,
            &settings.imagery_url,
            http::credential("DG_API_TOKEN")?,
        )?;
        Ok(Self {
            api: Arc::new(api),
            specs: specs.clone(),
            settings,
        })
    }

    pub fn settings(&self) -> &DgSettings {
        &self.settings
    }

    fn projection_for(&self, bbox: &BoundingBox) -> String {
        self.settings.override_proj.clone().unwrap_or_else(|| {
            let (lon, lat) = bbox.centroid();
            projection::epsg_crs(projection::utm_epsg(lat, lon))
        })
    }

    fn wants_pansharpen(&self, bbox: &BoundingBox) -> bool {
        let (dx, dy) = bbox.side_distances();
        (dx + dy) / 2.0 < self.settings.pansharp_scale
    }

    /// AOI request for `record`: the part of the bbox it covers.
    pub fn aoi_request(&self, record: &CatalogRecord, bbox: &BoundingBox) -> AoiRequest {
        let (covered, _) = overlap(bbox, [&record.footprint]);
        AoiRequest {
            window: BoundingBox::enclosing(&covered).unwrap_or(*bbox),
            proj: self.projection_for(bbox),
            band_type: self.settings.band_type.clone(),
            pansharpen: self.wants_pansharpen(bbox),
            acomp: self.settings.acomp,
        }
    }

    fn staged_name(&self, record: &CatalogRecord, bbox: &BoundingBox) -> String {
        format!(
            "{}{}_{}_{}.tif",
            self.specs.file_header,
            http::sanitize(&record.id),
            record.acquired.format("%Y%m%dT%H%M%S"),
            bbox.tag()
        )
    }

    async fn fetch(
        &self,
        record: &CatalogRecord,
        bbox: &BoundingBox,
        staging_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<StagedFile> {
        let request = self.aoi_request(record, bbox);
        let path = staging_dir.join(self.staged_name(record, bbox));
        info!("Staging {} at {:?}", record.id, path);
        let staged = self.api.fetch_aoi(&record.id, &request, &path, cancel).await?;
        expand_histogram(
            &staged.path,
            self.settings.expand_percentile,
            self.settings.expand_target,
        )?;
        Ok(staged)
    }

    /// `None` when the record failed in a way that only rules out this record.
    async fn try_fetch(
        &self,
        record: &CatalogRecord,
        bbox: &BoundingBox,
        staging_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<StagedFile>> {
        match self.fetch(record, bbox, staging_dir, cancel).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.is_transient() => {
                warn!("Dropping {}: {}", record.id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Provider for DigitalGlobeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DigitalGlobe
    }

    fn specs(&self) -> &ImageSpecs {
        &self.specs
    }

    async fn search(&self, bbox: &BoundingBox) -> Result<Vec<CatalogRecord>> {
        let request = DgSearch::new(
            bbox,
            self.settings.filters(&self.specs),
            self.specs.start_date,
            self.specs.end_date,
        );
        let mut records = Vec::new();
        for raw in self.api.search(&request).await? {
            let id = raw.identifier.clone();
            match raw.into_record() {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {}", id, e),
            }
        }
        records.sort_by(|a, b| b.acquired.cmp(&a.acquired));
        info!("Search found {} records.", records.len());
        Ok(records)
    }

    async fn search_by_id(&self, id: &str, _extra: Option<&str>) -> Result<CatalogRecord> {
        self.api.get_record(id).await?.into_record()
    }

    fn compile_scenes(&self, records: Vec<CatalogRecord>, bbox: &BoundingBox) -> Vec<Scene> {
        let scenes = compile_single_record(records, bbox, CompileParams::from(&self.specs));
        info!(
            "Found {} images of {} requested.",
            scenes.len(),
            self.specs.n_images
        );
        scenes
    }

    /// Strips that fail to arrive are replaced by the scene's alternates,
    /// newest first, until one arrives.
    async fn download(
        &self,
        scene: &Scene,
        bbox: &BoundingBox,
        staging_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<StagedFile>> {
        let mut staged = Vec::with_capacity(scene.len());
        for record in &scene.records {
            if let Some(file) = self.try_fetch(record, bbox, staging_dir, cancel).await? {
                staged.push(file);
            }
        }
        for record in &scene.alternates {
            if !staged.is_empty() {
                break;
            }
            info!("Falling back to {} for scene {:?}", record.id, scene.ids());
            if let Some(file) = self.try_fetch(record, bbox, staging_dir, cancel).await? {
                staged.push(file);
            }
        }
        if staged.is_empty() {
            return Err(Error::NoAssets { ids: scene.ids() });
        }
        Ok(staged)
    }

    fn band_map(&self, product_type: &str, asset_type: &str) -> Result<Vec<u32>> {
        match (sensor_bands(product_type), asset_type) {
            (Some(8), "MS") => Ok(vec![5, 3, 2, 7]),
            (Some(4), "MS") => Ok(vec![3, 2, 1, 4]),
            _ => Err(unknown_band_map(product_type, asset_type)),
        }
    }

    fn asset_type(&self, _record: &CatalogRecord) -> String {
        self.settings.band_type.clone()
    }

    fn target_crs(&self, _central: &CatalogRecord, bbox: &BoundingBox) -> String {
        let crs = self.projection_for(bbox);
        debug!("Mosaic projection {}", crs);
        crs
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::client::{AoiRequest, DgApi, DgRecord, DgSearch};
    use crate::core::cancel::CancelToken;
    use crate::core::model::StagedFile;
    use crate::error::{Error, Result};
    use crate::io::writers::write_tiff_stack;
    use crate::providers::testing::{fixture_georef, fixture_stack};

    #[derive(Default)]
    pub struct FakeDgApi {
        pub records: Vec<Value>,
        /// Ids whose imagery request is refused.
        pub refused: HashSet<String>,
        pub searches: Mutex<Vec<DgSearch>>,
        pub aoi_requests: Mutex<Vec<AoiRequest>>,
    }

    pub fn dg_record(id: &str, sensor: &str, timestamp: &str, wkt: &str) -> Value {
        json!({
            "identifier": id,
            "properties": {
                "timestamp": timestamp,
                "sensorPlatformName": sensor,
                "cloudCover": 1.0,
                "panResolution": 0.5,
                "footprintWkt": wkt
            }
        })
    }

    #[async_trait]
    impl DgApi for FakeDgApi {
        async fn search(&self, request: &DgSearch) -> Result<Vec<DgRecord>> {
            self.searches.lock().unwrap().push(request.clone());
            Ok(self
                .records
                .iter()
                .map(|r| serde_json::from_value(r.clone()).unwrap())
                .collect())
        }

        async fn get_record(&self, id: &str) -> Result<DgRecord> {
            self.records
                .iter()
                .find(|r| r["identifier"] == id)
                .map(|r| serde_json::from_value(r.clone()).unwrap())
                .ok_or_else(|| Error::NotFound { id: id.to_string() })
        }

        async fn fetch_aoi(
            &self,
            id: &str,
            request: &AoiRequest,
            path: &Path,
            _cancel: &CancelToken,
        ) -> Result<StagedFile> {
            self.aoi_requests.lock().unwrap().push(request.clone());
            if self.refused.contains(id) {
                return Err(Error::Provider {
                    provider: "digital_globe",
                    message: format!("403 imagery for {} is not available", id),
                });
            }
            let staged = StagedFile::new(id, path);
            write_tiff_stack(path, &fixture_stack(), &fixture_georef())?;
            Ok(staged)
        }
    }
}
