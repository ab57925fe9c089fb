//! Landsat composites from a thumbnail web service. The catalog is
//! synthetic: each scene is an end date, stepped back from `endDate`, and the
//! delivered image carries no georeferencing.
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::{Map, json};
use tracing::{debug, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::model::{CatalogRecord, Scene, StagedFile};
use crate::core::scenes::{CompileParams, compile_single_record};
use crate::core::specs::{DEFAULT_STYLES, ImageSpecs, SpecAdjustment};
use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::providers::{Provider, http, unknown_band_map};
use crate::types::ProviderKind;

pub const DEFAULT_APP_URL: &str = "http://earthrise-assets.herokuapp.com/nasa/image";
pub const PRODUCT_TYPE: &str = "LandsatComposite";
const PROVIDER: &str = "landsat";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LandsatSettings {
    pub app_url: String,
    /// Days of imagery folded into one composite.
    pub composite_days: u32,
}

impl Default for LandsatSettings {
    fn default() -> Self {
        Self {
            app_url: DEFAULT_APP_URL.into(),
            composite_days: 90,
        }
    }
}

/// Point, scale and date window a composite is requested for.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRequest {
    pub lat: f64,
    pub lon: f64,
    /// Service scale: mean bbox side in km / 100.
    pub scale: f64,
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

impl CompositeRequest {
    pub fn id(&self) -> String {
        format!(
            "landsat_{:.4}_{:.4}_{:.3}_{}",
            self.lat, self.lon, self.scale, self.end
        )
    }

    /// Inverse of [`CompositeRequest::id`].
    pub fn from_id(id: &str, composite_days: u32) -> Option<Self> {
        let mut parts = id.strip_prefix("landsat_")?.split('_');
        let lat = parts.next()?.parse().ok()?;
        let lon = parts.next()?.parse().ok()?;
        let scale = parts.next()?.parse().ok()?;
        let end = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            lat,
            lon,
            scale,
            begin: end - Duration::days(i64::from(composite_days)),
            end,
        })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("lat", format!("{:.4}", self.lat)),
            ("lon", format!("{:.4}", self.lon)),
            ("scale", format!("{:.3}", self.scale)),
            ("begin", self.begin.to_string()),
            ("end", self.end.to_string()),
        ]
    }

    fn into_record(self) -> Result<CatalogRecord> {
        let bbox = BoundingBox::from_scale(self.lat, self.lon, self.scale * 100.0)?;
        let mut extra = Map::new();
        extra.insert("begin".into(), json!(self.begin.to_string()));
        extra.insert("scale".into(), json!(self.scale));
        Ok(CatalogRecord {
            id: self.id(),
            provider: ProviderKind::Landsat,
            acquired: self.end.and_time(NaiveTime::MIN).and_utc(),
            footprint: bbox.to_multi_polygon(),
            product_type: PRODUCT_TYPE.into(),
            sensor_instance: "landsat".into(),
            cloud_cover: None,
            resolution: None,
            epsg_code: None,
            thumbnail: None,
            extra,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ImageLink {
    url: String,
}

#[async_trait]
pub trait CompositeApi: Send + Sync {
    /// Ask the service for a composite and stage the image it links to.
    async fn fetch(
        &self,
        request: &CompositeRequest,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<StagedFile>;
}

/// Two-step fetch: a JSON document carrying the image `url`, then the image.
pub struct CompositeClient {
    http: reqwest::Client,
    app_url: String,
}

impl CompositeClient {
    pub fn new(app_url: &str) -> Result<Self> {
        Ok(Self {
            http: http::client(http::READ_TIMEOUT_SECS)?,
            app_url: app_url.to_string(),
        })
    }
}

#[async_trait]
impl CompositeApi for CompositeClient {
    async fn fetch(
        &self,
        request: &CompositeRequest,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<StagedFile> {
        let response = self
            .http
            .get(&self.app_url)
            .query(&request.query())
            .send()
            .await?;
        let text = http::check(PROVIDER, response).await?.text().await?;
        let link: ImageLink = serde_json::from_str(&text).map_err(|e| Error::Provider {
            provider: PROVIDER,
            message: format!("unexpected composite response: {}", e),
        })?;
        debug!("Composite {} at {}", request.id(), link.url);
        let image = http::check(PROVIDER, self.http.get(&link.url).send().await?).await?;
        http::stage_response(&request.id(), image, path, cancel).await
    }
}

pub struct LandsatProvider {
    api: Arc<dyn CompositeApi>,
    specs: ImageSpecs,
    settings: LandsatSettings,
    adjustments: Vec<SpecAdjustment>,
}

impl LandsatProvider {
    pub fn new(api: Arc<dyn CompositeApi>, specs: &ImageSpecs) -> Result<Self> {
        let settings: LandsatSettings = specs.provider_settings()?;
        if settings.composite_days == 0 {
            return Err(Error::config("composite_days must be at least 1"));
        }
        let (specs, adjustments) = Self::adjust(specs);
        Ok(Self {
            api,
            specs,
            settings,
            adjustments,
        })
    }

    pub fn from_env(specs: &ImageSpecs) -> Result<Self> {
        let settings: LandsatSettings = specs.provider_settings()?;
        Self::new(Arc::new(CompositeClient::new(&settings.app_url)?), specs)
    }

    /// Composites carry no near-infrared band and want their own style.
    fn adjust(specs: &ImageSpecs) -> (ImageSpecs, Vec<SpecAdjustment>) {
        let mut adjusted = specs.clone();
        let mut adjustments = Vec::new();
        if specs.uses_default_styles() {
            adjusted.write_styles = vec!["landsat".into()];
            adjustments.push(SpecAdjustment::new(
                "write_styles",
                json!(DEFAULT_STYLES),
                json!(adjusted.write_styles),
                "composites use the landsat style",
            ));
        }
        if specs.wants_indices() {
            adjusted.landcover_indices.clear();
            adjustments.push(SpecAdjustment::new(
                "landcover_indices",
                json!(specs.landcover_indices),
                json!([]),
                "composites carry no near-infrared band",
            ));
        }
        (adjusted, adjustments)
    }

    fn step_days(&self) -> i64 {
        i64::from(self.specs.skip_days.max(self.settings.composite_days))
    }

    /// Composite windows ending at `endDate` (or today), newest first, no
    /// earlier than `startDate`.
    pub fn requests(&self, bbox: &BoundingBox) -> Vec<CompositeRequest> {
        let (lon, lat) = bbox.centroid();
        let (dx, dy) = bbox.side_distances();
        let scale = (dx + dy) / 2.0 / 100.0;
        let latest = self.specs.end_or_now().date_naive();
        let earliest = self.specs.start_date.map(|d| d.date_naive());
        let window = Duration::days(i64::from(self.settings.composite_days));

        (0..self.specs.n_images as i64)
            .map(|n| latest - Duration::days(n * self.step_days()))
            .take_while(|end| earliest.is_none_or(|start| *end - window >= start))
            .map(|end| CompositeRequest {
                lat,
                lon,
                scale,
                begin: end - window,
                end,
            })
            .collect()
    }

    fn request_for(&self, record: &CatalogRecord) -> Result<CompositeRequest> {
        CompositeRequest::from_id(&record.id, self.settings.composite_days).ok_or_else(|| {
            Error::Processing(format!("{} is not a composite identifier", record.id))
        })
    }
}

#[async_trait]
impl Provider for LandsatProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Landsat
    }

    fn specs(&self) -> &ImageSpecs {
        &self.specs
    }

    fn adjustments(&self) -> &[SpecAdjustment] {
        &self.adjustments
    }

    async fn search(&self, bbox: &BoundingBox) -> Result<Vec<CatalogRecord>> {
        self.requests(bbox)
            .into_iter()
            .map(CompositeRequest::into_record)
            .collect()
    }

    async fn search_by_id(&self, id: &str, _extra: Option<&str>) -> Result<CatalogRecord> {
        CompositeRequest::from_id(id, self.settings.composite_days)
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?
            .into_record()
    }

    fn compile_scenes(&self, records: Vec<CatalogRecord>, bbox: &BoundingBox) -> Vec<Scene> {
        let params = CompileParams {
            // composite footprints are the requested box itself
            min_intersect: 0.0,
            ..CompileParams::from(&self.specs)
        };
        compile_single_record(records, bbox, params)
    }

    async fn download(
        &self,
        scene: &Scene,
        bbox: &BoundingBox,
        staging_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<StagedFile>> {
        let mut staged = Vec::with_capacity(scene.len());
        for record in &scene.records {
            let request = self.request_for(record)?;
            let path = staging_dir.join(format!(
                "{}{}_{}.png",
                self.specs.file_header,
                http::sanitize(&record.id),
                bbox.tag()
            ));
            info!("Requesting composite {} to {}", request.begin, request.end);
            match self.api.fetch(&request, &path, cancel).await {
                Ok(file) => staged.push(file),
                Err(e) if e.is_transient() => warn!("Dropping {}: {}", record.id, e),
                Err(e) => return Err(e),
            }
        }
        if staged.is_empty() {
            return Err(Error::NoAssets { ids: scene.ids() });
        }
        Ok(staged)
    }

    fn band_map(&self, product_type: &str, asset_type: &str) -> Result<Vec<u32>> {
        match (product_type, asset_type) {
            (PRODUCT_TYPE, "visual") => Ok(vec![1, 2, 3]),
            _ => Err(unknown_band_map(product_type, asset_type)),
        }
    }

    fn asset_type(&self, _record: &CatalogRecord) -> String {
        "visual".into()
    }

    fn georeferenced(&self) -> bool {
        false
    }
}
