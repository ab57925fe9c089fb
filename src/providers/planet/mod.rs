//! Planet Labs: small same-day tiles stitched per satellite, assets activated
//! on demand and polled until ready.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::model::{CatalogRecord, Scene, StagedFile};
use crate::core::scenes::{CompileParams, compile_grouped};
use crate::core::specs::{ImageSpecs, SpecAdjustment};
use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::providers::{Provider, http, unknown_band_map};
use crate::types::ProviderKind;

pub mod activation;
pub mod client;

pub use activation::{ActivationPolicy, ActivationState};
pub use client::{PlanetApi, PlanetAsset, PlanetClient, PlanetItem};

/// Item types in deduplication precedence order.
pub const KNOWN_ITEM_TYPES: [&str; 5] = [
    "PSScene4Band",
    "PSScene3Band",
    "PSOrthoTile",
    "REOrthoTile",
    "SkySatScene",
];
pub const KNOWN_ASSET_TYPES: [&str; 3] = ["analytic", "ortho_visual", "visual"];

/// 1-based R, G, B(, NIR) bands per item and asset type.
pub fn planet_band_map(item_type: &str, asset_type: &str) -> Option<&'static [u32]> {
    Some(match (item_type, asset_type) {
        ("PSScene3Band", "visual" | "analytic") => &[1, 2, 3],
        ("PSScene4Band", "analytic") => &[3, 2, 1, 4],
        ("PSOrthoTile", "visual") => &[1, 2, 3],
        ("PSOrthoTile", "analytic") => &[3, 2, 1, 4],
        ("REOrthoTile", "visual") => &[1, 2, 3],
        ("REOrthoTile", "analytic") => &[3, 2, 1, 5],
        ("SkySatScene", "ortho_visual") => &[3, 2, 1],
        ("SkySatScene", "analytic") => &[3, 2, 1, 4],
        _ => return None,
    })
}

/// Planet keys read from the specs' extension map.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlanetSettings {
    pub item_types: Vec<String>,
    pub asset_type: String,
    pub poll_interval_secs: u64,
    pub activation_timeout_secs: u64,
    pub api_url: String,
    /// Maximum quick-search pages followed.
    pub page_limit: usize,
}

impl Default for PlanetSettings {
    fn default() -> Self {
        Self {
            item_types: vec![
                "PSScene3Band".into(),
                "PSOrthoTile".into(),
                "REOrthoTile".into(),
            ],
            asset_type: "analytic".into(),
            poll_interval_secs: 10,
            activation_timeout_secs: 1800,
            api_url: client::DEFAULT_API_URL.into(),
            page_limit: 10,
        }
    }
}

impl PlanetSettings {
    pub fn from_specs(specs: &ImageSpecs) -> Result<(Self, Vec<SpecAdjustment>)> {
        let mut settings: Self = specs.provider_settings()?;
        settings.validate()?;
        let adjustments = settings.adjust_for_indices(specs);
        Ok((settings, adjustments))
    }

    fn validate(&self) -> Result<()> {
        if self.item_types.is_empty() {
            return Err(Error::config("item_types must not be empty"));
        }
        if let Some(bad) = self
            .item_types
            .iter()
            .find(|t| !KNOWN_ITEM_TYPES.contains(&t.as_str()))
        {
            return Err(Error::config(format!("unknown Planet item type '{}'", bad)));
        }
        if !KNOWN_ASSET_TYPES.contains(&self.asset_type.as_str()) {
            return Err(Error::config(format!(
                "unknown Planet asset type '{}'",
                self.asset_type
            )));
        }
        if self.poll_interval_secs == 0 || self.activation_timeout_secs < self.poll_interval_secs {
            return Err(Error::config(
                "activation_timeout_secs must be at least poll_interval_secs, which must be positive",
            ));
        }
        if self.page_limit == 0 {
            return Err(Error::config("page_limit must be at least 1"));
        }
        Ok(())
    }

    /// Indices need the analytic near-infrared band.
    fn adjust_for_indices(&mut self, specs: &ImageSpecs) -> Vec<SpecAdjustment> {
        let mut adjustments = Vec::new();
        if !specs.wants_indices() {
            return adjustments;
        }
        if self.asset_type != "analytic" {
            adjustments.push(SpecAdjustment::new(
                "asset_type",
                json!(self.asset_type),
                json!("analytic"),
                "landcover indices require the analytic asset",
            ));
            self.asset_type = "analytic".into();
        }
        if self.item_types.iter().any(|t| t == "PSScene3Band") {
            let before = json!(self.item_types);
            self.item_types.retain(|t| t != "PSScene3Band");
            if !self.item_types.iter().any(|t| t == "PSScene4Band") {
                self.item_types.push("PSScene4Band".into());
            }
            adjustments.push(SpecAdjustment::new(
                "item_types",
                before,
                json!(self.item_types),
                "PSScene3Band has no near-infrared band",
            ));
        }
        adjustments
    }

    pub fn policy(&self) -> ActivationPolicy {
        ActivationPolicy {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.activation_timeout_secs),
        }
    }
}

pub struct PlanetProvider {
    api: Arc<dyn PlanetApi>,
    specs: ImageSpecs,
    settings: PlanetSettings,
    adjustments: Vec<SpecAdjustment>,
}

impl PlanetProvider {
    pub fn new(api: Arc<dyn PlanetApi>, specs: &ImageSpecs) -> Result<Self> {
        let (settings, adjustments) = PlanetSettings::from_specs(specs)?;
        Ok(Self {
            api,
            specs: specs.clone(),
            settings,
            adjustments,
        })
    }

    /// Client authenticated with `PL_API_KEY`.
    pub fn from_env(specs: &ImageSpecs) -> Result<Self> {
        let (settings, adjustments) = PlanetSettings::from_specs(specs)?;
        let api = PlanetClient::new(&settings.api_url, http::credential("PL_API_KEY")?)?;
        Ok(Self {
            api: Arc::new(api),
            specs: specs.clone(),
            settings,
            adjustments,
        })
    }

    pub fn settings(&self) -> &PlanetSettings {
        &self.settings
    }

    fn staged_name(&self, record: &CatalogRecord, bbox: &BoundingBox) -> String {
        format!(
            "{}{}_{}_{}.tif",
            self.specs.file_header,
            http::sanitize(&record.id),
            self.settings.asset_type,
            bbox.tag()
        )
    }
}

#[async_trait]
impl Provider for PlanetProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Planet
    }

    fn specs(&self) -> &ImageSpecs {
        &self.specs
    }

    fn adjustments(&self) -> &[SpecAdjustment] {
        &self.adjustments
    }

    async fn search(&self, bbox: &BoundingBox) -> Result<Vec<CatalogRecord>> {
        let request = client::build_search_request(bbox, &self.specs, &self.settings.item_types);
        let items = self
            .api
            .quick_search(&request, self.settings.page_limit)
            .await?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id.clone();
            match item.into_record() {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable item {}: {}", id, e),
            }
        }
        info!("Search found {} records.", records.len());
        Ok(records)
    }

    /// `extra` is the item type; without it every configured item type is tried.
    async fn search_by_id(&self, id: &str, extra: Option<&str>) -> Result<CatalogRecord> {
        let candidates: Vec<&str> = match extra {
            Some(item_type) => vec![item_type],
            None => self.settings.item_types.iter().map(String::as_str).collect(),
        };
        for item_type in candidates {
            match self.api.get_item(item_type, id).await {
                Ok(item) => return item.into_record(),
                Err(Error::NotFound { .. }) => debug!("{} is not a {}", id, item_type),
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound { id: id.to_string() })
    }

    fn compile_scenes(&self, records: Vec<CatalogRecord>, bbox: &BoundingBox) -> Vec<Scene> {
        compile_grouped(
            records,
            bbox,
            CompileParams::from(&self.specs),
            &KNOWN_ITEM_TYPES,
        )
    }

    /// Activate and download every record concurrently. Records that time out
    /// or fail are dropped.
    async fn download(
        &self,
        scene: &Scene,
        bbox: &BoundingBox,
        staging_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<StagedFile>> {
        let policy = self.settings.policy();
        let mut tasks = JoinSet::new();
        for record in &scene.records {
            let api = Arc::clone(&self.api);
            let id = record.id.clone();
            let item_type = record.product_type.clone();
            let asset_type = self.settings.asset_type.clone();
            let path = staging_dir.join(self.staged_name(record, bbox));
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = async {
                    let asset = activation::activate(
                        api.as_ref(),
                        &item_type,
                        &id,
                        &asset_type,
                        policy,
                        &cancel,
                    )
                    .await?;
                    info!("Staging {} at {:?}", id, path);
                    api.download(&id, &asset, &path, &cancel).await
                }
                .await;
                (id, result)
            });
        }

        let mut staged = Vec::with_capacity(scene.len());
        while let Some(joined) = tasks.join_next().await {
            let (id, result) =
                joined.map_err(|e| Error::Processing(format!("retrieval task failed: {}", e)))?;
            match result {
                Ok(file) => staged.push(file),
                Err(e) if e.is_transient() => warn!("Dropping {}: {}", id, e),
                Err(e) => return Err(e),
            }
        }
        if staged.is_empty() {
            return Err(Error::NoAssets { ids: scene.ids() });
        }
        Ok(staged)
    }

    fn band_map(&self, product_type: &str, asset_type: &str) -> Result<Vec<u32>> {
        planet_band_map(product_type, asset_type)
            .map(<[u32]>::to_vec)
            .ok_or_else(|| unknown_band_map(product_type, asset_type))
    }

    fn asset_type(&self, _record: &CatalogRecord) -> String {
        self.settings.asset_type.clone()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::client::{PlanetApi, PlanetAsset, PlanetItem};
    use crate::core::cancel::CancelToken;
    use crate::core::model::StagedFile;
    use crate::error::{Error, Result};
    use crate::io::writers::write_tiff_stack;
    use crate::providers::testing::{fixture_georef, fixture_stack};

    /// Data API double. Assets become active after a configured number of
    /// status polls; downloads write the fixture GeoTIFF.
    #[derive(Default)]
    pub struct FakePlanetApi {
        pub features: Vec<Value>,
        pub broken_downloads: HashSet<String>,
        pub malformed_assets: HashSet<String>,
        polls_needed: HashMap<String, u32>,
        polls: Mutex<HashMap<String, u32>>,
        activations: Mutex<Vec<String>>,
        pub requests: Mutex<Vec<Value>>,
    }

    pub fn feature(id: &str, item_type: &str, acquired: &str, bounds: (f64, f64, f64, f64)) -> Value {
        let (x0, y0, x1, y1) = bounds;
        json!({
            "id": id,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]]
            },
            "properties": {
                "acquired": acquired,
                "item_type": item_type,
                "satellite_id": "0f12",
                "cloud_cover": 0.01,
                "pixel_resolution": 3.0,
                "epsg_code": 32631
            }
        })
    }

    impl FakePlanetApi {
        pub fn with_features(features: Vec<Value>) -> Self {
            Self {
                features,
                ..Self::default()
            }
        }

        /// `0` means the asset is already active.
        pub fn activates_after(mut self, id: &str, polls: u32) -> Self {
            self.polls_needed.insert(id.to_string(), polls);
            self
        }

        pub fn activations(&self) -> Vec<String> {
            self.activations.lock().unwrap().clone()
        }

        fn asset(status: &str, id: &str) -> PlanetAsset {
            serde_json::from_value(json!({
                "status": status,
                "location": format!("https://download/{}", id),
                "_links": {"activate": format!("https://activate/{}", id)}
            }))
            .unwrap()
        }
    }

    #[async_trait]
    impl PlanetApi for FakePlanetApi {
        async fn quick_search(&self, request: &Value, _page_limit: usize) -> Result<Vec<PlanetItem>> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self
                .features
                .iter()
                .map(|f| serde_json::from_value(f.clone()).unwrap())
                .collect())
        }

        async fn get_item(&self, item_type: &str, id: &str) -> Result<PlanetItem> {
            self.features
                .iter()
                .find(|f| f["id"] == id && f["properties"]["item_type"] == item_type)
                .map(|f| serde_json::from_value(f.clone()).unwrap())
                .ok_or_else(|| Error::NotFound { id: id.to_string() })
        }

        async fn get_asset(
            &self,
            _item_type: &str,
            id: &str,
            _asset_type: &str,
        ) -> Result<Option<PlanetAsset>> {
            if self.malformed_assets.contains(id) {
                return serde_json::from_value::<PlanetAsset>(json!({"status": 7}))
                    .map(Some)
                    .map_err(Error::from);
            }
            let Some(&needed) = self.polls_needed.get(id) else {
                return Ok(None);
            };
            let mut polls = self.polls.lock().unwrap();
            let calls = polls.entry(id.to_string()).or_insert(0);
            let status = if needed == 0 || (*calls > 0 && *calls >= needed) {
                "active"
            } else if *calls == 0 {
                "inactive"
            } else {
                "activating"
            };
            *calls += 1;
            Ok(Some(Self::asset(status, id)))
        }

        async fn activate(&self, asset: &PlanetAsset) -> Result<()> {
            let link = asset.links.activate.clone().unwrap_or_default();
            let id = link.rsplit('/').next().unwrap_or_default().to_string();
            self.activations.lock().unwrap().push(id);
            Ok(())
        }

        async fn download(
            &self,
            record_id: &str,
            _asset: &PlanetAsset,
            path: &Path,
            _cancel: &CancelToken,
        ) -> Result<StagedFile> {
            if self.broken_downloads.contains(record_id) {
                return Err(Error::Provider {
                    provider: "planet",
                    message: "connection reset".into(),
                });
            }
            let staged = StagedFile::new(record_id, path);
            write_tiff_stack(path, &fixture_stack(), &fixture_georef())?;
            Ok(staged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakePlanetApi, feature};
    use super::*;
    use rstest::rstest;
    use serde_json::Value;
    use tokio::time::Instant;

    fn specs_with(extra: Value) -> ImageSpecs {
        let Value::Object(map) = extra else { panic!() };
        ImageSpecs::default().with_overrides(&map).unwrap()
    }

    fn provider(api: FakePlanetApi, specs: &ImageSpecs) -> PlanetProvider {
        PlanetProvider::new(Arc::new(api), specs).unwrap()
    }

    #[rstest]
    #[case("PSScene3Band", "visual", &[1, 2, 3])]
    #[case("PSScene4Band", "analytic", &[3, 2, 1, 4])]
    #[case("PSOrthoTile", "analytic", &[3, 2, 1, 4])]
    #[case("REOrthoTile", "analytic", &[3, 2, 1, 5])]
    #[case("SkySatScene", "ortho_visual", &[3, 2, 1])]
    fn band_maps(#[case] item: &str, #[case] asset: &str, #[case] expected: &[u32]) {
        let p = provider(FakePlanetApi::default(), &ImageSpecs::default());
        let bands = p.band_map(item, asset).unwrap();
        assert_eq!(bands, expected);
        assert!(bands.len() == 3 || bands.len() == 4);
    }

    #[rstest]
    #[case("PSScene4Band", "visual")]
    #[case("Landsat8", "analytic")]
    fn unknown_band_map_pairs_are_errors(#[case] item: &str, #[case] asset: &str) {
        let p = provider(FakePlanetApi::default(), &ImageSpecs::default());
        assert!(matches!(p.band_map(item, asset), Err(Error::BandMap { .. })));
    }

    #[test]
    fn indices_force_analytic_four_band() {
        let mut specs = specs_with(json!({
            "asset_type": "visual",
            "item_types": ["PSScene3Band", "PSOrthoTile"],
        }));
        specs.landcover_indices = vec!["ndvi".into()];
        let p = provider(FakePlanetApi::default(), &specs);

        assert_eq!(p.settings().asset_type, "analytic");
        assert_eq!(p.settings().item_types, ["PSOrthoTile", "PSScene4Band"]);
        let keys: Vec<_> = p.adjustments().iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, ["asset_type", "item_types"]);
        assert_eq!(p.specs().extra["asset_type"], "visual");
    }

    #[test]
    fn no_adjustments_without_indices() {
        let p = provider(FakePlanetApi::default(), &ImageSpecs::default());
        assert!(p.adjustments().is_empty());
        assert_eq!(p.settings(), &PlanetSettings::default());
    }

    #[test]
    fn unknown_item_type_is_rejected_at_construction() {
        let specs = specs_with(json!({"item_types": ["Bogus"]}));
        let err = PlanetProvider::new(Arc::new(FakePlanetApi::default()), &specs)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn staged_names_carry_asset_and_bbox() {
        let mut specs = ImageSpecs::default();
        specs.file_header = "run1_".into();
        let p = provider(FakePlanetApi::default(), &specs);
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let record = crate::core::model::fixtures::record("x/y", 0, (0.0, 0.0, 1.0, 1.0));
        assert_eq!(
            p.staged_name(&record, &bbox),
            format!("run1_x_y_analytic_{}.tif", bbox.tag())
        );
    }

    #[tokio::test]
    async fn search_sends_item_types_and_converts_records() {
        let api = FakePlanetApi::with_features(vec![
            feature("a", "PSOrthoTile", "2024-06-30T10:00:00Z", (0.0, 0.0, 1.0, 1.0)),
            feature("b", "PSOrthoTile", "2024-06-29T10:00:00Z", (0.0, 0.0, 1.0, 1.0)),
        ]);
        let api = Arc::new(api);
        let p = PlanetProvider::new(api.clone(), &ImageSpecs::default()).unwrap();
        let bbox = BoundingBox::new(0.2, 0.2, 0.8, 0.8).unwrap();

        let records = p.search(&bbox).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].provider, ProviderKind::Planet);
        let requests = api.requests.lock().unwrap();
        assert_eq!(
            requests[0]["item_types"],
            json!(["PSScene3Band", "PSOrthoTile", "REOrthoTile"])
        );
    }

    #[tokio::test]
    async fn search_by_id_tries_configured_item_types() {
        let api = FakePlanetApi::with_features(vec![feature(
            "tile",
            "REOrthoTile",
            "2024-06-30T10:00:00Z",
            (0.0, 0.0, 1.0, 1.0),
        )]);
        let p = provider(api, &ImageSpecs::default());
        let record = p.search_by_id("tile", None).await.unwrap();
        assert_eq!(record.product_type, "REOrthoTile");
        let err = p.search_by_id("tile", Some("PSOrthoTile")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn download_activates_concurrently_and_drops_failures() {
        let specs = specs_with(json!({"activation_timeout_secs": 60}));
        let api = FakePlanetApi::default()
            .activates_after("fast", 1)
            .activates_after("slower", 3)
            .activates_after("never", u32::MAX);
        let p = provider(api, &specs);
        let scene = Scene::new(vec![
            crate::core::model::fixtures::record("fast", 0, (0.0, 0.0, 1.0, 1.0)),
            crate::core::model::fixtures::record("slower", 0, (0.0, 0.0, 1.0, 1.0)),
            crate::core::model::fixtures::record("never", 0, (0.0, 0.0, 1.0, 1.0)),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();

        let started = Instant::now();
        let staged = p
            .download(&scene, &bbox, dir.path(), &CancelToken::new())
            .await
            .unwrap();
        // bounded by the timeout, not the sum of the polls
        assert!(started.elapsed() <= Duration::from_secs(60));
        let mut ids: Vec<_> = staged.iter().map(|s| s.record_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, ["fast", "slower"]);
        assert!(staged.iter().all(|s| s.path.exists()));
    }

    #[tokio::test(start_paused = true)]
    async fn download_with_nothing_retrieved_is_an_error() {
        let mut api = FakePlanetApi::default().activates_after("a", 0);
        api.broken_downloads.insert("a".into());
        let p = provider(api, &ImageSpecs::default());
        let scene = Scene::new(vec![crate::core::model::fixtures::record(
            "a",
            0,
            (0.0, 0.0, 1.0, 1.0),
        )]);
        let dir = tempfile::tempdir().unwrap();
        let err = p
            .download(
                &scene,
                &BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(),
                dir.path(),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAssets { ids } if ids == ["a"]));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_asset_only_drops_its_record() {
        let mut api = FakePlanetApi::default()
            .activates_after("good", 0)
            .activates_after("bad", 0);
        api.malformed_assets.insert("bad".into());
        let p = provider(api, &ImageSpecs::default());
        let scene = Scene::new(vec![
            crate::core::model::fixtures::record("good", 0, (0.0, 0.0, 1.0, 1.0)),
            crate::core::model::fixtures::record("bad", 0, (0.0, 0.0, 1.0, 1.0)),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let staged = p
            .download(
                &scene,
                &BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(),
                dir.path(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        let ids: Vec<_> = staged.iter().map(|s| s.record_id.as_str()).collect();
        assert_eq!(ids, ["good"]);
    }
}
