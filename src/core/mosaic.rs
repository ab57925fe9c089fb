//! Geometric reconciliation of a retrieved scene into one raster.
//!
//! Order matters: pick the target CRS from the central record, reproject the
//! components that differ, crop each to the bbox/footprint intersection while
//! reordering bands, then merge when there is more than one component. Each
//! intermediate is a `TempPath` and disappears as soon as the next step has
//! consumed it.
use geo::MultiPolygon;
use tempfile::TempPath;
use tracing::{debug, info};

use crate::core::model::{CatalogRecord, RecordSummary, RetrievedAsset};
use crate::core::scenes::overlap_fraction;
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, overlap, projection};
use crate::io::toolchain::RasterToolchain;
use crate::providers::Provider;

/// A scene reduced to a single raster.
#[derive(Debug)]
pub struct Mosaic {
    pub path: TempPath,
    /// Band count, canonical R, G, B(, NIR) order.
    pub bands: usize,
    /// Area the raster covers, in lon/lat.
    pub footprint: MultiPolygon<f64>,
    pub components: Vec<RecordSummary>,
}

/// Index of the record covering the largest share of `bbox`; first wins ties.
fn central_record<'a, I>(bbox: &BoundingBox, records: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a CatalogRecord>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, record) in records.into_iter().enumerate() {
        let frac = overlap_fraction(bbox, std::iter::once(record));
        if best.is_none_or(|(_, f)| frac > f) {
            best = Some((i, frac));
        }
    }
    best.map(|(i, _)| i)
}

/// Reconcile `asset` into one raster restricted to the requested bands.
/// `with_nir` keeps the fourth (near-infrared) band for index products.
pub fn reconcile(
    provider: &dyn Provider,
    toolchain: &dyn RasterToolchain,
    bbox: &BoundingBox,
    asset: RetrievedAsset,
    with_nir: bool,
) -> Result<Mosaic> {
    let components: Vec<RecordSummary> = asset
        .records()
        .map(|r| r.summary(&provider.asset_type(r)))
        .collect();

    if !provider.georeferenced() {
        let mut parts = asset.components.into_iter();
        let (Some((record, path)), None) = (parts.next(), parts.next()) else {
            return Err(Error::Processing(
                "cannot mosaic several rasters without georeferencing".into(),
            ));
        };
        let bands = provider.band_map(&record.product_type, &provider.asset_type(&record))?;
        return Ok(Mosaic {
            path,
            bands: bands.len(),
            footprint: bbox.to_multi_polygon(),
            components,
        });
    }

    let footprints: Vec<MultiPolygon<f64>> =
        asset.records().map(|r| provider.footprint(r)).collect();
    let (intersection, frac) = overlap(bbox, &footprints);
    let window = BoundingBox::enclosing(&intersection).ok_or_else(|| {
        Error::Processing(format!("scene does not intersect bbox {}", bbox))
    })?;
    debug!("Crop window {} covers {:.1}% of bbox", window, frac * 100.0);

    let central = central_record(bbox, asset.records())
        .ok_or_else(|| Error::Processing("empty scene".into()))?;
    let target_crs = provider.target_crs(&asset.components[central].0, bbox);
    info!(
        "Reconciling {} component(s) in {}",
        asset.components.len(),
        target_crs
    );

    let mut cropped: Vec<TempPath> = Vec::with_capacity(asset.components.len());
    let mut bands_out = 0;
    for (record, raw) in asset.components {
        let mut current = raw;
        if let Some(native) = record.epsg_code.map(projection::epsg_crs) {
            if native != target_crs {
                current = TempPath::from_path(toolchain.reproject(&current, &target_crs)?);
            }
        }
        let mut bands = provider.band_map(&record.product_type, &provider.asset_type(&record))?;
        if !with_nir {
            bands.truncate(3);
        }
        bands_out = bands.len();
        cropped.push(TempPath::from_path(
            toolchain.crop_and_reband(&current, &window, &bands)?,
        ));
    }

    let path = if cropped.len() > 1 {
        let inputs: Vec<_> = cropped.iter().map(|p| p.to_path_buf()).collect();
        TempPath::from_path(toolchain.merge(&inputs)?)
    } else {
        cropped
            .pop()
            .ok_or_else(|| Error::Processing("no component survived cropping".into()))?
    };

    Ok(Mosaic {
        path,
        bands: bands_out,
        footprint: intersection,
        components,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::CopyToolchain;
    use super::*;
    use crate::core::model::StagedFile;
    use crate::core::model::fixtures::record;
    use crate::providers::testing::FakeProvider;
    use geo::Area;

    fn bbox() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap()
    }

    fn stage(dir: &std::path::Path, records: &[CatalogRecord]) -> RetrievedAsset {
        let staged = records
            .iter()
            .map(|r| {
                let path = dir.join(format!("{}.tif", r.id));
                std::fs::write(&path, r.id.as_bytes()).unwrap();
                StagedFile::new(&r.id, path)
            })
            .collect();
        RetrievedAsset::assemble(crate::core::model::Scene::new(records.to_vec()), staged).unwrap()
    }

    #[test]
    fn single_component_skips_merge() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record("solo", 0, (0.5, -1.0, 2.0, 2.0));
        let expected = overlap(&bbox(), [&rec.footprint]).0;
        let asset = stage(dir.path(), &[rec]);

        let provider = FakeProvider::default();
        let tc = CopyToolchain::default();
        let mosaic = reconcile(&provider, &tc, &bbox(), asset, false).unwrap();

        assert_eq!(tc.calls(), ["crop [3, 2, 1]"]);
        assert_eq!(mosaic.bands, 3);
        assert!((mosaic.footprint.unsigned_area() - expected.unsigned_area()).abs() < 1e-12);
        assert!(mosaic.path.exists());
        assert!(!dir.path().join("solo.tif").exists());
    }

    #[test]
    fn components_are_reprojected_to_central_crs_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let mut west = record("west", 0, (-1.0, -1.0, 0.6, 2.0));
        west.epsg_code = Some(32632);
        let east = record("east", 0, (0.6, -1.0, 2.0, 2.0));
        let asset = stage(dir.path(), &[west, east]);

        let provider = FakeProvider::default();
        let tc = CopyToolchain::default();
        let mosaic = reconcile(&provider, &tc, &bbox(), asset, true).unwrap();

        assert_eq!(
            tc.calls(),
            ["crop [3, 2, 1, 4]", "reproject EPSG:32632", "crop [3, 2, 1, 4]", "merge 2"]
        );
        assert_eq!(mosaic.bands, 4);
        assert_eq!(mosaic.components.len(), 2);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p != &mosaic.path.to_path_buf())
            .collect();
        assert!(leftovers.is_empty(), "intermediates left: {:?}", leftovers);
    }

    #[test]
    fn unknown_band_map_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = record("odd", 0, (-1.0, -1.0, 2.0, 2.0));
        rec.product_type = "Mystery".into();
        let asset = stage(dir.path(), &[rec]);
        let err = reconcile(
            &FakeProvider::default(),
            &CopyToolchain::default(),
            &bbox(),
            asset,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::BandMap { .. }));
    }

    #[test]
    fn merge_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let a = record("a", 0, (-1.0, -1.0, 0.5, 2.0));
        let b = record("b", 0, (0.5, -1.0, 2.0, 2.0));
        let asset = stage(dir.path(), &[a, b]);
        let tc = CopyToolchain {
            fail_merge: true,
            ..Default::default()
        };
        let err = reconcile(&FakeProvider::default(), &tc, &bbox(), asset, false).unwrap_err();
        assert!(matches!(err, Error::Toolchain(_)));
    }
}
