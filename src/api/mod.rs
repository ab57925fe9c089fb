//! High-level library API: the acquisition [`Pipeline`] that drives one
//! provider from catalog search to output products, and the multi-provider
//! [`handler::GrabberHandler`]. Prefer these entrypoints over the low-level
//! `core` modules when integrating satgrab.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::model::{RecordSummary, RetrievedAsset, Scene, SceneRecord};
use crate::core::mosaic::reconcile;
use crate::core::processing::{postprocess, product_stem};
use crate::core::specs::ImageSpecs;
use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::io::toolchain::RasterToolchain;
use crate::providers::Provider;
use crate::types::ProviderKind;

pub mod handler;

/// Side, in km, of the box searched around a point.
pub const LATLON_SEARCH_KM: f64 = 0.001;

/// Staging directory used when the caller doesn't pick one.
pub const DEFAULT_STAGING_DIR: &str = "tmp-staging";

/// A scene whose grab failed, reported next to its successful siblings.
#[derive(Debug)]
pub struct SceneFailure {
    /// `None` when the task died before it could report.
    pub provider: Option<ProviderKind>,
    /// Records of the scene; empty when the failure precedes compilation.
    pub ids: Vec<String>,
    pub error: Error,
}

impl std::fmt::Display for SceneFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let provider = self.provider.map(|p| p.as_str()).unwrap_or("unknown");
        write!(f, "{} scene {:?}: {}", provider, self.ids, self.error)
    }
}

/// Outcome of one scene's task.
pub type SceneOutcome = std::result::Result<SceneRecord, SceneFailure>;

/// Counts of a finished run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PullReport {
    pub processed: usize,
    pub failed: usize,
}

impl PullReport {
    pub fn of<T, E>(outcomes: &[std::result::Result<T, E>]) -> Self {
        let processed = outcomes.iter().filter(|o| o.is_ok()).count();
        Self {
            processed,
            failed: outcomes.len() - processed,
        }
    }
}

/// Wait for every task of `set` in completion order. Cancelling aborts the
/// remaining tasks and waits for them to unwind, so the staged files they
/// own are gone before this returns.
pub(crate) async fn join_completed<T: 'static>(
    mut set: JoinSet<T>,
    cancel: &CancelToken,
) -> Result<Vec<std::result::Result<T, JoinError>>> {
    let mut done = Vec::with_capacity(set.len());
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Cancelling {} in-flight task(s)", set.len());
                set.abort_all();
                while set.join_next().await.is_some() {}
                return Err(Error::Cancelled);
            }
            next = set.join_next() => match next {
                Some(res) => done.push(res),
                None => return Ok(done),
            },
        }
    }
}

/// Search → compile → retrieve → reconcile → post-process, for one provider.
#[derive(Clone)]
pub struct Pipeline {
    provider: Arc<dyn Provider>,
    toolchain: Arc<dyn RasterToolchain>,
    staging_dir: PathBuf,
    output_dir: PathBuf,
}

impl Pipeline {
    /// Outputs land in `staging_dir` unless [`Pipeline::with_output_dir`] says otherwise.
    pub fn new<P: Into<PathBuf>>(
        provider: Arc<dyn Provider>,
        toolchain: Arc<dyn RasterToolchain>,
        staging_dir: P,
    ) -> Self {
        let staging_dir = staging_dir.into();
        Self {
            provider,
            toolchain,
            output_dir: staging_dir.clone(),
            staging_dir,
        }
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, output_dir: P) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn specs(&self) -> &ImageSpecs {
        self.provider.specs()
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        Ok(())
    }

    /// Search the catalog over `bbox` and compile the hits into scenes.
    pub async fn prep_scenes(&self, bbox: &BoundingBox) -> Result<Vec<Scene>> {
        let records = self.provider.search(bbox).await?;
        info!(
            "{} returned {} record(s) over {}",
            self.kind(),
            records.len(),
            bbox
        );
        let scenes = self.provider.compile_scenes(records, bbox);
        let wanted = self.specs().n_images;
        if scenes.len() < wanted {
            info!("Found {} of {} requested scene(s)", scenes.len(), wanted);
        }
        Ok(scenes)
    }

    /// Download, reconcile and post-process one scene.
    pub async fn grab_scene(
        &self,
        scene: Scene,
        bbox: &BoundingBox,
        cancel: &CancelToken,
    ) -> Result<SceneRecord> {
        let staged = self
            .provider
            .download(&scene, bbox, &self.staging_dir, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let asset = RetrievedAsset::assemble(scene, staged)?;
        let specs = self.specs();
        let mosaic = reconcile(
            self.provider.as_ref(),
            self.toolchain.as_ref(),
            bbox,
            asset,
            specs.wants_indices(),
        )?;
        let component_records = mosaic.components.clone();
        let stem = product_stem(&self.output_dir, specs, &mosaic, bbox);
        let products = postprocess(mosaic, specs, self.toolchain.as_ref(), &stem)?;
        Ok(SceneRecord {
            component_records,
            products,
        })
    }

    fn spawn_grab(
        &self,
        set: &mut JoinSet<(ProviderKind, SceneOutcome)>,
        scene: Scene,
        bbox: BoundingBox,
        cancel: &CancelToken,
    ) {
        let this = self.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let kind = this.kind();
            let ids = scene.ids();
            let outcome = this
                .grab_scene(scene, &bbox, &cancel)
                .await
                .map_err(|error| SceneFailure {
                    provider: Some(kind),
                    ids,
                    error,
                });
            (kind, outcome)
        });
    }

    fn flatten(
        &self,
        joined: Vec<std::result::Result<(ProviderKind, SceneOutcome), JoinError>>,
    ) -> Vec<SceneOutcome> {
        joined
            .into_iter()
            .map(|res| {
                let outcome = match res {
                    Ok((_, outcome)) => outcome,
                    Err(e) => Err(SceneFailure {
                        provider: Some(self.kind()),
                        ids: Vec::new(),
                        error: Error::external(e),
                    }),
                };
                if let Err(failure) = &outcome {
                    error!("{}", failure);
                }
                outcome
            })
            .collect()
    }

    /// Grab every compiled scene concurrently. One outcome per scene, in
    /// completion order; a failed scene never aborts its siblings.
    pub async fn pull(&self, bbox: &BoundingBox, cancel: &CancelToken) -> Result<Vec<SceneOutcome>> {
        self.ensure_dirs().await?;
        let scenes = self.prep_scenes(bbox).await?;
        let mut set = JoinSet::new();
        for scene in scenes {
            self.spawn_grab(&mut set, scene, *bbox, cancel);
        }
        let outcomes = self.flatten(join_completed(set, cancel).await?);
        let report = PullReport::of(&outcomes);
        info!(
            "{}: processed={} failed={}",
            self.kind(),
            report.processed,
            report.failed
        );
        Ok(outcomes)
    }

    /// Grab the single record `id`, whatever its overlap with `bbox`. A
    /// missing record fails the call.
    pub async fn pull_by_id(
        &self,
        bbox: &BoundingBox,
        id: &str,
        extra: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<SceneRecord> {
        self.ensure_dirs().await?;
        let record = self.provider.search_by_id(id, extra).await?;
        let scene = Scene::new(vec![record]);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = self.grab_scene(scene, bbox, cancel) => res,
        }
    }

    /// Cleaned summaries of the first `max_records` catalog hits over `bbox`.
    pub async fn search_clean(&self, bbox: &BoundingBox, max_records: usize) -> Result<Vec<RecordSummary>> {
        let records = self.provider.search(bbox).await?;
        Ok(records
            .iter()
            .take(max_records)
            .map(|r| r.summary(&self.provider.asset_type(r)))
            .collect())
    }

    /// Like [`Pipeline::search_clean`], over a tiny box around a point.
    pub async fn search_latlon_clean(
        &self,
        lat: f64,
        lon: f64,
        max_records: usize,
    ) -> Result<Vec<RecordSummary>> {
        let bbox = BoundingBox::from_scale(lat, lon, LATLON_SEARCH_KM)?;
        self.search_clean(&bbox, max_records).await
    }

    pub async fn search_id_clean(&self, id: &str, extra: Option<&str>) -> Result<RecordSummary> {
        let record = self.provider.search_by_id(id, extra).await?;
        Ok(record.summary(&self.provider.asset_type(&record)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::{Value, json};

    use super::*;
    use crate::core::model::CatalogRecord;
    use crate::core::model::fixtures::record;
    use crate::core::mosaic::testing::CopyToolchain;
    use crate::providers::testing::FakeProvider;
    use crate::types::ProductKind;

    fn bbox() -> BoundingBox {
        BoundingBox::from_scale(37.0, 15.0, 1.0).unwrap()
    }

    fn full() -> (f64, f64, f64, f64) {
        let b = bbox();
        (b.min_lon() - 0.01, b.min_lat() - 0.01, b.max_lon() + 0.01, b.max_lat() + 0.01)
    }

    fn specs(overrides: Value) -> ImageSpecs {
        match overrides {
            Value::Object(map) => ImageSpecs::default().with_overrides(&map).unwrap(),
            _ => unreachable!(),
        }
    }

    struct Harness {
        pipeline: Pipeline,
        toolchain: Arc<CopyToolchain>,
        staging: tempfile::TempDir,
        output: tempfile::TempDir,
    }

    fn harness(provider: FakeProvider) -> Harness {
        let staging = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(CopyToolchain::default());
        let pipeline = Pipeline::new(Arc::new(provider), toolchain.clone(), staging.path())
            .with_output_dir(output.path());
        Harness {
            pipeline,
            toolchain,
            staging,
            output,
        }
    }

    fn provider(overrides: Value, records: Vec<CatalogRecord>) -> FakeProvider {
        FakeProvider::with_records(specs(overrides), records)
    }

    fn kinds(record: &SceneRecord) -> Vec<(ProductKind, String)> {
        record
            .products
            .iter()
            .map(|p| (p.kind, p.name.clone()))
            .collect()
    }

    fn staged_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[tokio::test]
    async fn single_full_cover_record_yields_styles_and_raw() {
        let h = harness(provider(
            json!({"N_images": 1, "min_intersect": 0.9, "skip_days": 0}),
            vec![record("solo", 0, full())],
        ));
        let outcomes = h.pipeline.pull(&bbox(), &CancelToken::new()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let scene = outcomes.into_iter().next().unwrap().unwrap();
        assert_eq!(scene.component_records.len(), 1);
        assert_eq!(scene.component_records[0].id, "solo");
        assert_eq!(
            kinds(&scene),
            [
                (ProductKind::Style, "base".to_string()),
                (ProductKind::Style, "vibrant".to_string()),
                (ProductKind::Raw, "raw".to_string()),
            ]
        );
        for path in scene.paths() {
            assert!(path.starts_with(h.output.path()));
            assert!(path.exists());
        }
        assert!(!h.toolchain.calls().iter().any(|c| c.starts_with("merge")));
        assert!(staged_files(h.staging.path()).is_empty());
    }

    #[tokio::test]
    async fn thumbnail_run_deletes_raw_mosaic() {
        let h = harness(provider(
            json!({"thumbnails": true}),
            vec![record("solo", 0, full())],
        ));
        let outcomes = h.pipeline.pull(&bbox(), &CancelToken::new()).await.unwrap();
        let scene = outcomes.into_iter().next().unwrap().unwrap();
        assert!(scene.products.iter().all(|p| p.kind == ProductKind::Style));
        assert_eq!(staged_files(h.output.path()).len(), 2);
        assert!(staged_files(h.staging.path()).is_empty());
    }

    #[tokio::test]
    async fn same_day_halves_are_merged_into_one_mosaic() {
        let b = bbox();
        let (lon, _) = b.centroid();
        let (x0, y0, x1, y1) = full();
        let h = harness(provider(
            json!({"N_images": 1, "min_intersect": 0.9}),
            vec![record("west", 0, (x0, y0, lon, y1)), record("east", 0, (lon, y0, x1, y1))],
        ));
        let outcomes = h.pipeline.pull(&b, &CancelToken::new()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let scene = outcomes.into_iter().next().unwrap().unwrap();
        let ids: Vec<_> = scene.component_records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["west", "east"]);
        assert!(h.toolchain.calls().contains(&"merge 2".to_string()));
    }

    #[tokio::test]
    async fn skip_days_spaces_accepted_scenes() {
        let h = harness(provider(
            json!({"N_images": 2, "skip_days": 30}),
            vec![
                record("d10", 10, full()),
                record("d0", 0, full()),
                record("d40", 40, full()),
            ],
        ));
        let scenes = h.pipeline.prep_scenes(&bbox()).await.unwrap();
        let ids: Vec<_> = scenes.iter().map(Scene::ids).collect();
        assert_eq!(ids, [vec!["d0".to_string()], vec!["d40".to_string()]]);
    }

    #[tokio::test]
    async fn failed_scene_is_reported_beside_its_sibling() {
        let mut fake = provider(
            json!({"N_images": 2}),
            vec![record("good", 0, full()), record("bad", 5, full())],
        );
        fake.failing = HashSet::from(["bad".to_string()]);
        let h = harness(fake);
        let outcomes = h.pipeline.pull(&bbox(), &CancelToken::new()).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(PullReport::of(&outcomes), PullReport { processed: 1, failed: 1 });
        let failure = outcomes.iter().find_map(|o| o.as_ref().err()).unwrap();
        assert_eq!(failure.ids, ["bad"]);
        assert!(matches!(failure.error, Error::NoAssets { .. }));
    }

    #[tokio::test]
    async fn partial_fulfilment_is_not_an_error() {
        let h = harness(provider(json!({"N_images": 3}), vec![record("only", 0, full())]));
        let outcomes = h.pipeline.pull(&bbox(), &CancelToken::new()).await.unwrap();
        assert_eq!(outcomes.len(), 1);

        let empty = harness(provider(json!({}), Vec::new()));
        assert!(empty.pipeline.pull(&bbox(), &CancelToken::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_pull_leaves_no_staged_files() {
        let h = harness(provider(json!({"N_images": 2}), vec![
            record("a", 0, full()),
            record("b", 3, full()),
        ]));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = h.pipeline.pull(&bbox(), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(staged_files(h.staging.path()).is_empty());
        assert!(staged_files(h.output.path()).is_empty());
    }

    #[tokio::test]
    async fn pull_by_id_ignores_overlap_but_requires_the_record() {
        let b = bbox();
        let (lon, _) = b.centroid();
        let (x0, y0, _, y1) = full();
        let h = harness(provider(
            json!({"min_intersect": 0.9}),
            vec![record("half", 0, (x0, y0, lon, y1))],
        ));
        let scene = h
            .pipeline
            .pull_by_id(&b, "half", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(scene.component_records[0].id, "half");

        let err = h
            .pipeline
            .pull_by_id(&b, "ghost", None, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn clean_searches_summarize_records() {
        let h = harness(provider(
            json!({}),
            (0..4).map(|i| record(&format!("r{i}"), i, full())).collect(),
        ));
        let summaries = h.pipeline.search_clean(&bbox(), 2).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].asset_type, "analytic");
        assert_eq!(summaries[0].clouds, Some(1.0));

        let near = h.pipeline.search_latlon_clean(37.0, 15.0, 10).await.unwrap();
        assert_eq!(near.len(), 4);

        let one = h.pipeline.search_id_clean("r3", None).await.unwrap();
        assert_eq!(one.id, "r3");
        assert_eq!(one.provider, ProviderKind::Planet);
    }
}
