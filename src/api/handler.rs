//! Several providers, one bounding box.
//!
//! Each provider gets its own copy of the bbox, resized per its size limits,
//! compiles its scenes, and then every scene of every provider is grabbed
//! concurrently. With an [`ObjectStore`] configured, finished products are
//! uploaded and the local files removed whatever the upload outcome.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{Pipeline, PullReport, SceneFailure, SceneOutcome, join_completed};
use crate::core::cancel::CancelToken;
use crate::core::model::SceneRecord;
use crate::core::specs::ImageSpecs;
use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::io::toolchain::RasterToolchain;
use crate::providers;
use crate::types::ProviderKind;

/// Destination for finished products.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `local` under `name` and return where it can be fetched.
    async fn upload(&self, local: &Path, name: &str) -> Result<String>;
}

/// Copies products into a directory; URLs are `file://` paths.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn upload(&self, local: &Path, name: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let dst = self.root.join(name);
        tokio::fs::copy(local, &dst).await?;
        let abs = tokio::fs::canonicalize(&dst).await?;
        Ok(format!("file://{}", abs.display()))
    }
}

/// A grabbed scene, extended with where its products were uploaded.
#[derive(Debug, Clone, Serialize)]
pub struct GrabbedScene {
    pub provider: ProviderKind,
    #[serde(flatten)]
    pub record: SceneRecord,
    pub urls: Vec<String>,
}

pub type GrabOutcome = std::result::Result<GrabbedScene, SceneFailure>;

pub struct GrabberHandler {
    pipelines: Vec<Pipeline>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl GrabberHandler {
    pub fn new(pipelines: Vec<Pipeline>) -> Self {
        Self {
            pipelines,
            store: None,
        }
    }

    /// Build one pipeline per provider kind, all staging into `staging_dir`.
    pub fn from_kinds(
        kinds: &[ProviderKind],
        specs: &ImageSpecs,
        toolchain: Arc<dyn RasterToolchain>,
        staging_dir: &Path,
    ) -> Result<Self> {
        if kinds.is_empty() {
            return Err(Error::config("no provider selected"));
        }
        let pipelines = kinds
            .iter()
            .map(|&kind| {
                let provider = providers::build(kind, specs)?;
                Ok(Pipeline::new(provider, toolchain.clone(), staging_dir))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(pipelines))
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    /// The bbox `pipeline` searches: rescaled and clamped to its provider's sizes.
    pub fn provider_bbox(pipeline: &Pipeline, bbox: &BoundingBox) -> Result<BoundingBox> {
        let specs = pipeline.specs();
        let (min_km, max_km) = specs.size_limits(pipeline.kind());
        bbox.enforce_size(specs.bbox_rescaling, min_km, max_km)
    }

    /// Grab every provider's scenes over `bbox`, concurrently. A provider
    /// whose search fails is reported as one failure; the others proceed.
    pub async fn grab(&self, bbox: &BoundingBox, cancel: &CancelToken) -> Result<Vec<GrabOutcome>> {
        let mut outcomes: Vec<GrabOutcome> = Vec::new();
        let mut set: JoinSet<(ProviderKind, SceneOutcome)> = JoinSet::new();

        for pipeline in &self.pipelines {
            let pbbox = Self::provider_bbox(pipeline, bbox)?;
            if pbbox != *bbox {
                info!("{} searches {} instead of {}", pipeline.kind(), pbbox, bbox);
            }
            pipeline.ensure_dirs().await?;
            match pipeline.prep_scenes(&pbbox).await {
                Ok(scenes) => {
                    for scene in scenes {
                        pipeline.spawn_grab(&mut set, scene, pbbox, cancel);
                    }
                }
                Err(error) => {
                    warn!("{} search failed: {}", pipeline.kind(), error);
                    outcomes.push(Err(SceneFailure {
                        provider: Some(pipeline.kind()),
                        ids: Vec::new(),
                        error,
                    }));
                }
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }
        info!("Grabbing {} scene(s) from {} provider(s)", set.len(), self.pipelines.len());

        for joined in join_completed(set, cancel).await? {
            let outcome = match joined {
                Ok((provider, Ok(record))) => Ok(self.upload(provider, record).await),
                Ok((_, Err(failure))) => {
                    warn!("{}", failure);
                    Err(failure)
                }
                Err(join) => Err(SceneFailure {
                    provider: None,
                    ids: Vec::new(),
                    error: Error::external(join),
                }),
            };
            outcomes.push(outcome);
        }

        let report = PullReport::of(&outcomes);
        info!("processed={} failed={}", report.processed, report.failed);
        Ok(outcomes)
    }

    /// Upload each product and delete the local copy whatever happens.
    async fn upload(&self, provider: ProviderKind, record: SceneRecord) -> GrabbedScene {
        let mut urls = Vec::new();
        if let Some(store) = &self.store {
            for product in &record.products {
                let name = product
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| product.name.clone());
                match store.upload(&product.path, &name).await {
                    Ok(url) => {
                        info!("Uploaded {} to {}", name, url);
                        urls.push(url);
                    }
                    Err(e) => warn!("Upload of {} failed: {}", name, e),
                }
                if let Err(e) = tokio::fs::remove_file(&product.path).await {
                    warn!("Could not remove {:?}: {}", product.path, e);
                }
            }
        }
        GrabbedScene {
            provider,
            record,
            urls,
        }
    }
}
