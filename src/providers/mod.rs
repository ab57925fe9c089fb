//! Catalog providers.
//!
//! Every provider implements [`Provider`], the contract the acquisition
//! pipeline drives: search the catalog, compile records into scenes, download
//! a scene's rasters, and describe how to reconcile them (band maps,
//! footprints, target projection). Providers are selected by
//! [`ProviderKind`] through [`build`].
//!
//! # Implementations
//!
//! | Provider | Scenes | Retrieval |
//! |---|---|---|
//! | [`planet::PlanetProvider`] | same-day tiles per satellite, stitched | activation + polling |
//! | [`digital_globe::DigitalGlobeProvider`] | one strip per scene | pre-activated AOI GeoTIFF |
//! | [`landsat::LandsatProvider`] | one composite per end date | two-step fetch, not georeferenced |
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use geo::MultiPolygon;

use crate::core::cancel::CancelToken;
use crate::core::model::{CatalogRecord, Scene, StagedFile};
use crate::core::specs::{ImageSpecs, SpecAdjustment};
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, projection};
use crate::types::ProviderKind;

pub mod digital_globe;
pub mod http;
pub mod landsat;
pub mod planet;

/// A catalog of imagery the pipeline can acquire from.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// The specs this provider runs with, after its adjustments.
    fn specs(&self) -> &ImageSpecs;

    /// Changes made to the caller's specs when the provider was built.
    fn adjustments(&self) -> &[SpecAdjustment] {
        &[]
    }

    /// Query the catalog for records over `bbox`, newest first.
    async fn search(&self, bbox: &BoundingBox) -> Result<Vec<CatalogRecord>>;

    /// Look up one record. `extra` disambiguates ids where the catalog needs
    /// it (e.g. the item type).
    async fn search_by_id(&self, id: &str, extra: Option<&str>) -> Result<CatalogRecord>;

    /// Group newest-first records into at most `N_images` scenes.
    fn compile_scenes(&self, records: Vec<CatalogRecord>, bbox: &BoundingBox) -> Vec<Scene>;

    /// Fetch every record of `scene` into `staging_dir`. Records that fail
    /// are logged and left out; an error means nothing usable was fetched.
    async fn download(
        &self,
        scene: &Scene,
        bbox: &BoundingBox,
        staging_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<StagedFile>>;

    /// 1-based source bands in R, G, B(, NIR) order.
    fn band_map(&self, product_type: &str, asset_type: &str) -> Result<Vec<u32>>;

    /// Asset type fetched for `record`.
    fn asset_type(&self, record: &CatalogRecord) -> String;

    fn footprint(&self, record: &CatalogRecord) -> MultiPolygon<f64> {
        record.footprint.clone()
    }

    /// Projection the scene's mosaic is built in: the central record's own
    /// CRS, or the UTM zone of the bbox when the catalog gives none.
    fn target_crs(&self, central: &CatalogRecord, bbox: &BoundingBox) -> String {
        let code = central.epsg_code.unwrap_or_else(|| {
            let (lon, lat) = bbox.centroid();
            projection::utm_epsg(lat, lon)
        });
        projection::epsg_crs(code)
    }

    /// Whether downloaded rasters carry georeferencing. When false the
    /// download is used as the mosaic directly.
    fn georeferenced(&self) -> bool {
        true
    }
}

/// Band-map lookup failure for `(product_type, asset_type)`.
pub(crate) fn unknown_band_map(product_type: &str, asset_type: &str) -> Error {
    Error::BandMap {
        product_type: product_type.to_string(),
        asset_type: asset_type.to_string(),
    }
}

/// Build the provider registered under `kind`, with HTTP clients configured
/// from the environment.
pub fn build(kind: ProviderKind, specs: &ImageSpecs) -> Result<Arc<dyn Provider>> {
    Ok(match kind {
        ProviderKind::Planet => Arc::new(planet::PlanetProvider::from_env(specs)?),
        ProviderKind::DigitalGlobe => {
            Arc::new(digital_globe::DigitalGlobeProvider::from_env(specs)?)
        }
        ProviderKind::Landsat => Arc::new(landsat::LandsatProvider::from_env(specs)?),
    })
}
