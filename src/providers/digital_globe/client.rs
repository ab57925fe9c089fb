//! DigitalGlobe catalog and imagery endpoints.
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::cancel::CancelToken;
use crate::core::model::{CatalogRecord, StagedFile};
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, parse_wkt_footprint};
use crate::providers::http;
use crate::types::ProviderKind;

pub const DEFAULT_CATALOG_URL: &str = "https://geobigdata.io/catalog/v2";
pub const DEFAULT_IMAGERY_URL: &str = "https://geobigdata.io/imagery/v1";
const PROVIDER: &str = "digital_globe";

#[derive(Debug, Clone, Deserialize)]
pub struct DgRecord {
    pub identifier: String,
    pub properties: DgProperties,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DgProperties {
    pub timestamp: DateTime<Utc>,
    pub sensor_platform_name: String,
    #[serde(default)]
    pub cloud_cover: Option<f64>,
    #[serde(default)]
    pub pan_resolution: Option<f64>,
    #[serde(default)]
    pub off_nadir_angle: Option<f64>,
    #[serde(rename = "browseURL", default)]
    pub browse_url: Option<String>,
    pub footprint_wkt: String,
    #[serde(default)]
    pub vendor: Option<String>,
}

impl DgRecord {
    pub fn into_record(self) -> Result<CatalogRecord> {
        let props = self.properties;
        let footprint = parse_wkt_footprint(&props.footprint_wkt)?;
        let mut extra = Map::new();
        if let Some(angle) = props.off_nadir_angle {
            extra.insert("offNadirAngle".into(), json!(angle));
        }
        if let Some(vendor) = props.vendor {
            extra.insert("vendor".into(), json!(vendor));
        }
        Ok(CatalogRecord {
            id: self.identifier,
            provider: ProviderKind::DigitalGlobe,
            acquired: props.timestamp,
            footprint,
            product_type: props.sensor_platform_name.clone(),
            sensor_instance: props.sensor_platform_name,
            cloud_cover: props.cloud_cover,
            resolution: props.pan_resolution,
            // AOI rasters are delivered in the requested projection
            epsg_code: None,
            thumbnail: props.browse_url,
            extra,
        })
    }
}

/// Catalog search body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DgSearch {
    pub search_area_wkt: String,
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub types: Vec<String>,
}

impl DgSearch {
    pub fn new(
        bbox: &BoundingBox,
        filters: Vec<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        let fmt = |d: DateTime<Utc>| d.to_rfc3339_opts(SecondsFormat::Millis, true);
        Self {
            search_area_wkt: bbox_wkt(bbox),
            filters,
            start_date: start.map(fmt),
            end_date: end.map(fmt),
            types: vec!["DigitalGlobeAcquisition".into()],
        }
    }
}

/// Parameters of an AOI GeoTIFF request.
#[derive(Debug, Clone, PartialEq)]
pub struct AoiRequest {
    pub window: BoundingBox,
    /// `EPSG:<code>` the raster is delivered in.
    pub proj: String,
    pub band_type: String,
    pub pansharpen: bool,
    pub acomp: bool,
}

impl AoiRequest {
    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "bbox",
                format!(
                    "{},{},{},{}",
                    self.window.min_lon(),
                    self.window.min_lat(),
                    self.window.max_lon(),
                    self.window.max_lat()
                ),
            ),
            ("proj", self.proj.clone()),
            ("bands", self.band_type.clone()),
            ("pansharpen", self.pansharpen.to_string()),
            ("acomp", self.acomp.to_string()),
            ("format", "tif".into()),
        ]
    }
}

pub fn bbox_wkt(bbox: &BoundingBox) -> String {
    let (x0, y0, x1, y1) = (bbox.min_lon(), bbox.min_lat(), bbox.max_lon(), bbox.max_lat());
    format!("POLYGON (({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))")
}

#[async_trait]
pub trait DgApi: Send + Sync {
    async fn search(&self, request: &DgSearch) -> Result<Vec<DgRecord>>;

    async fn get_record(&self, id: &str) -> Result<DgRecord>;

    /// Fetch the AOI GeoTIFF for `id` into `path`.
    async fn fetch_aoi(
        &self,
        id: &str,
        request: &AoiRequest,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<StagedFile>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<DgRecord>,
}

/// `reqwest` implementation using a bearer token.
pub struct DgClient {
    http: reqwest::Client,
    catalog_url: String,
    imagery_url: String,
    token: String,
}

impl DgClient {
    pub fn new(catalog_url: &str, imagery_url: &str, token: String) -> Result<Self> {
        Ok(Self {
            http: http::client(http::READ_TIMEOUT_SECS)?,
            catalog_url: catalog_url.trim_end_matches('/').to_string(),
            imagery_url: imagery_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl DgApi for DgClient {
    async fn search(&self, request: &DgSearch) -> Result<Vec<DgRecord>> {
        let response = self
            .http
            .post(format!("{}/search", self.catalog_url))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let body: SearchResponse = http::check(PROVIDER, response).await?.json().await?;
        Ok(body.results)
    }

    async fn get_record(&self, id: &str) -> Result<DgRecord> {
        let response = self
            .http
            .get(format!("{}/record/{}", self.catalog_url, id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound { id: id.to_string() });
        }
        let body: Value = http::check(PROVIDER, response).await?.json().await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn fetch_aoi(
        &self,
        id: &str,
        request: &AoiRequest,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<StagedFile> {
        let response = self
            .http
            .get(format!("{}/{}/aoi", self.imagery_url, id))
            .bearer_auth(&self.token)
            .query(&request.query())
            .send()
            .await?;
        let response = http::check(PROVIDER, response).await?;
        http::stage_response(id, response, path, cancel).await
    }
}
