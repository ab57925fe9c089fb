//! Planet Data API v1 access: quick search, item and asset lookup,
//! activation and download.
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::core::cancel::CancelToken;
use crate::core::model::{CatalogRecord, StagedFile};
use crate::core::specs::ImageSpecs;
use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::geometry::footprint::{bbox_geojson, parse_geojson_footprint};
use crate::providers::http;
use crate::types::ProviderKind;

pub const DEFAULT_API_URL: &str = "https://api.planet.com/data/v1";
const PROVIDER: &str = "planet";

/// One feature of a quick-search response or an item lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanetItem {
    pub id: String,
    pub geometry: Value,
    pub properties: ItemProperties,
    #[serde(rename = "_links", default)]
    pub links: ItemLinks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemProperties {
    pub acquired: DateTime<Utc>,
    pub item_type: String,
    pub satellite_id: String,
    /// Fraction, 0..1.
    #[serde(default)]
    pub cloud_cover: Option<f64>,
    #[serde(default)]
    pub pixel_resolution: Option<f64>,
    #[serde(default)]
    pub gsd: Option<f64>,
    #[serde(default)]
    pub epsg_code: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemLinks {
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(rename = "_self", default)]
    pub self_link: Option<String>,
}

impl PlanetItem {
    pub fn into_record(self) -> Result<CatalogRecord> {
        let footprint = parse_geojson_footprint(&self.geometry)?;
        let props = self.properties;
        let mut extra = Map::new();
        if let Some(gsd) = props.gsd {
            extra.insert("gsd".into(), json!(gsd));
        }
        if let Some(link) = self.links.self_link {
            extra.insert("full_record".into(), json!(link));
        }
        Ok(CatalogRecord {
            id: self.id,
            provider: ProviderKind::Planet,
            acquired: props.acquired,
            footprint,
            product_type: props.item_type,
            sensor_instance: props.satellite_id,
            cloud_cover: props.cloud_cover.map(|c| c * 100.0),
            resolution: props.pixel_resolution.or(props.gsd),
            epsg_code: props.epsg_code,
            thumbnail: self.links.thumbnail,
            extra,
        })
    }
}

/// Asset status as reported by the assets endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanetAsset {
    pub status: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "_links", default)]
    pub links: AssetLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetLinks {
    #[serde(default)]
    pub activate: Option<String>,
}

impl PlanetAsset {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn is_inactive(&self) -> bool {
        self.status == "inactive"
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    features: Vec<PlanetItem>,
    #[serde(rename = "_links", default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(rename = "_next", default)]
    next: Option<String>,
}

/// Operations the provider needs from the Data API.
#[async_trait]
pub trait PlanetApi: Send + Sync {
    /// Run a quick search sorted `acquired desc`, following `_next` links for
    /// at most `page_limit` pages.
    async fn quick_search(&self, request: &Value, page_limit: usize) -> Result<Vec<PlanetItem>>;

    async fn get_item(&self, item_type: &str, id: &str) -> Result<PlanetItem>;

    /// `None` when the item has no asset of `asset_type`.
    async fn get_asset(
        &self,
        item_type: &str,
        id: &str,
        asset_type: &str,
    ) -> Result<Option<PlanetAsset>>;

    async fn activate(&self, asset: &PlanetAsset) -> Result<()>;

    async fn download(
        &self,
        record_id: &str,
        asset: &PlanetAsset,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<StagedFile>;
}

fn date_filter(relation: &str, date: DateTime<Utc>) -> Value {
    let mut config = Map::new();
    config.insert(
        relation.to_string(),
        json!(date.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    json!({
        "type": "DateRangeFilter",
        "field_name": "acquired",
        "config": config,
    })
}

/// Quick-search request body: geometry, cloud cover and acquisition range
/// combined in an `AndFilter`.
pub fn build_search_request(bbox: &BoundingBox, specs: &ImageSpecs, item_types: &[String]) -> Value {
    let mut filters = vec![
        json!({
            "type": "GeometryFilter",
            "field_name": "geometry",
            "config": bbox_geojson(bbox),
        }),
        json!({
            "type": "RangeFilter",
            "field_name": "cloud_cover",
            "config": { "lt": specs.clouds / 100.0 },
        }),
    ];
    if let Some(start) = specs.start_date {
        filters.push(date_filter("gt", start));
    }
    if let Some(end) = specs.end_date {
        filters.push(date_filter("lt", end));
    }
    json!({
        "item_types": item_types,
        "filter": { "type": "AndFilter", "config": filters },
    })
}

/// `reqwest` implementation authenticating with an API key.
pub struct PlanetClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl PlanetClient {
    pub fn new(api_url: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            http: http::client(http::READ_TIMEOUT_SECS)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url).basic_auth(&self.api_key, Some(""))
    }

    async fn fetch_page(&self, response: reqwest::Response) -> Result<SearchPage> {
        Ok(http::check(PROVIDER, response).await?.json().await?)
    }
}

#[async_trait]
impl PlanetApi for PlanetClient {
    async fn quick_search(&self, request: &Value, page_limit: usize) -> Result<Vec<PlanetItem>> {
        let response = self
            .http
            .post(format!("{}/quick-search", self.api_url))
            .query(&[("_sort", "acquired desc")])
            .basic_auth(&self.api_key, Some(""))
            .json(request)
            .send()
            .await?;
        let mut page = self.fetch_page(response).await?;
        let mut items = std::mem::take(&mut page.features);
        let mut pages = 1;
        while let Some(next) = page.links.next.take() {
            if pages >= page_limit {
                debug!("Stopping quick search after {} pages", pages);
                break;
            }
            page = self.fetch_page(self.get(&next).send().await?).await?;
            items.append(&mut page.features);
            pages += 1;
        }
        debug!("Quick search returned {} items", items.len());
        Ok(items)
    }

    async fn get_item(&self, item_type: &str, id: &str) -> Result<PlanetItem> {
        let url = format!("{}/item-types/{}/items/{}", self.api_url, item_type, id);
        let response = self.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound { id: id.to_string() });
        }
        Ok(http::check(PROVIDER, response).await?.json().await?)
    }

    async fn get_asset(
        &self,
        item_type: &str,
        id: &str,
        asset_type: &str,
    ) -> Result<Option<PlanetAsset>> {
        let url = format!("{}/item-types/{}/items/{}/assets", self.api_url, item_type, id);
        let response = http::check(PROVIDER, self.get(&url).send().await?).await?;
        let mut assets: Map<String, Value> = response.json().await?;
        assets
            .remove(asset_type)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    async fn activate(&self, asset: &PlanetAsset) -> Result<()> {
        let Some(link) = asset.links.activate.as_deref() else {
            return Err(Error::Provider {
                provider: PROVIDER,
                message: "asset carries no activation link".into(),
            });
        };
        http::check(PROVIDER, self.get(link).send().await?).await?;
        Ok(())
    }

    async fn download(
        &self,
        record_id: &str,
        asset: &PlanetAsset,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<StagedFile> {
        let Some(location) = asset.location.as_deref() else {
            return Err(Error::Provider {
                provider: PROVIDER,
                message: format!("active asset for {} has no download location", record_id),
            });
        };
        let response = http::check(PROVIDER, self.get(location).send().await?).await?;
        http::stage_response(record_id, response, path, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature() -> Value {
        json!({
            "id": "20240630_101010_0f12",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
            },
            "properties": {
                "acquired": "2024-06-30T10:10:10.123456Z",
                "item_type": "PSScene4Band",
                "satellite_id": "0f12",
                "cloud_cover": 0.02,
                "pixel_resolution": 3.0,
                "gsd": 3.9,
                "epsg_code": 32633
            },
            "_links": {
                "_self": "https://api.planet.com/data/v1/item-types/PSScene4Band/items/x",
                "thumbnail": "https://tiles.planet.com/thumb"
            }
        })
    }

    #[test]
    fn item_converts_to_record() {
        let item: PlanetItem = serde_json::from_value(feature()).unwrap();
        let record = item.into_record().unwrap();
        assert_eq!(record.product_type, "PSScene4Band");
        assert_eq!(record.sensor_instance, "0f12");
        assert_eq!(record.epsg_code, Some(32633));
        assert!((record.cloud_cover.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(record.resolution, Some(3.0));
        assert_eq!(record.extra["gsd"], json!(3.9));
        assert_eq!(record.thumbnail.as_deref(), Some("https://tiles.planet.com/thumb"));
    }

    #[test]
    fn search_request_combines_filters() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let mut specs = ImageSpecs::default();
        specs.clouds = 20.0;
        specs.end_date = crate::core::specs::parse_date("2024-01-01").ok();
        let request = build_search_request(&bbox, &specs, &["PSScene4Band".to_string()]);

        assert_eq!(request["item_types"], json!(["PSScene4Band"]));
        assert_eq!(request["filter"]["type"], "AndFilter");
        let filters = request["filter"]["config"].as_array().unwrap();
        assert_eq!(filters.len(), 4);
        assert_eq!(filters[0]["config"]["type"], "Polygon");
        assert_eq!(filters[1]["config"]["lt"], json!(0.2));
        assert_eq!(filters[2]["config"]["gt"], "2008-09-01T00:00:00.000Z");
        assert_eq!(filters[3]["config"]["lt"], "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn asset_status_parses() {
        let asset: PlanetAsset = serde_json::from_value(json!({
            "status": "inactive",
            "_links": {"activate": "https://api.planet.com/activate"}
        }))
        .unwrap();
        assert!(asset.is_inactive());
        assert!(!asset.is_active());
        assert!(asset.location.is_none());
    }
}
