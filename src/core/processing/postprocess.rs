//! Mosaic → output products.
//!
//! Indices are computed first, while the near-infrared band is still
//! available. The visual bands then go through the coarse adjustment once and
//! are rendered once per requested style. The raw mosaic is kept as a product
//! of its own unless thumbnail mode asks for derived products only.
use std::path::{Path, PathBuf};

use ndarray::{Axis, s};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use super::color::{StyleParams, coarse_adjust, render_rgb};
use super::indices::LandcoverIndex;
use super::resize::{THUMBNAIL_SIZE, resize_rgb_u8, scale_geotransform};
use crate::core::model::OutputProduct;
use crate::core::mosaic::Mosaic;
use crate::core::specs::ImageSpecs;
use crate::error::Result;
use crate::geometry::BoundingBox;
use crate::io::toolchain::RasterToolchain;
use crate::io::writers::{write_f32_band, write_rgb_u8};
use crate::io::{Georef, RasterReader};
use crate::providers::http::sanitize;
use crate::types::ProductKind;

/// Common prefix of every product of `mosaic`:
/// `{dir}/{file_header}{YYYYMMDD}_{first id}[+n]_{bbox tag}`.
pub fn product_stem(dir: &Path, specs: &ImageSpecs, mosaic: &Mosaic, bbox: &BoundingBox) -> PathBuf {
    let date = mosaic
        .components
        .iter()
        .map(|c| c.timestamp)
        .max()
        .map(|t| t.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "undated".into());
    let mut ids = mosaic
        .components
        .first()
        .map(|c| sanitize(&c.id))
        .unwrap_or_else(|| "scene".into());
    if mosaic.components.len() > 1 {
        ids.push_str(&format!("+{}", mosaic.components.len() - 1));
    }
    dir.join(format!("{}{}_{}_{}", specs.file_header, date, ids, bbox.tag()))
}

fn product_path(stem: &Path, name: &str, ext: &str) -> PathBuf {
    let mut s = stem.as_os_str().to_owned();
    s.push(format!("_{}.{}", name, ext));
    PathBuf::from(s)
}

/// Move `tmp` to `dst`, copying when a rename across filesystems fails.
fn persist(tmp: TempPath, dst: &Path) -> Result<()> {
    match tmp.persist(dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("Rename to {:?} failed ({}); copying", dst, e.error);
            std::fs::copy(&e.path, dst)?;
            Ok(())
        }
    }
}

fn write_indices(
    specs: &ImageSpecs,
    stack: &ndarray::Array3<f64>,
    georef: &Georef,
    stem: &Path,
    products: &mut Vec<OutputProduct>,
) -> Result<()> {
    if !specs.wants_indices() {
        return Ok(());
    }
    let bands = stack.len_of(Axis(0));
    if bands < 4 {
        warn!(
            "Skipping landcover indices {:?}: mosaic has {} bands, no near-infrared",
            specs.landcover_indices, bands
        );
        return Ok(());
    }
    for name in &specs.landcover_indices {
        let Some(index) = LandcoverIndex::from_name(name) else {
            warn!("Unknown landcover index '{}', skipping", name);
            continue;
        };
        let values = index.compute(stack)?;
        let path = product_path(stem, index.as_str(), "tif");
        write_f32_band(&path, &values, georef)?;
        info!("Wrote {} to {:?}", index, path);
        products.push(OutputProduct {
            kind: ProductKind::Index,
            name: index.as_str().to_string(),
            path,
        });
    }
    Ok(())
}

/// Turn `mosaic` into the products `specs` asks for, written under `stem`.
pub fn postprocess(
    mosaic: Mosaic,
    specs: &ImageSpecs,
    toolchain: &dyn RasterToolchain,
    stem: &Path,
) -> Result<Vec<OutputProduct>> {
    let reader = RasterReader::open(&mosaic.path)?;
    let georef = reader.georef().clone();
    let stack = reader.read_stack()?;
    drop(reader);

    let mut products = Vec::new();
    write_indices(specs, &stack, &georef, stem, &mut products)?;

    let bands = stack.len_of(Axis(0));
    let mut visual = if bands > 3 {
        stack.slice(s![0..3, .., ..]).to_owned()
    } else {
        stack
    };
    coarse_adjust(&mut visual, &specs.color);

    for name in &specs.write_styles {
        let Some(style) = StyleParams::lookup(name) else {
            debug!("No parameters for style '{}', skipping", name);
            continue;
        };
        let mut rgb = render_rgb(&visual, &style)?;
        let mut out_georef = georef.clone();
        if specs.thumbnails {
            let from = (rgb.len_of(Axis(2)), rgb.len_of(Axis(1)));
            rgb = resize_rgb_u8(&rgb, THUMBNAIL_SIZE)?;
            let to = (rgb.len_of(Axis(2)), rgb.len_of(Axis(1)));
            out_georef.geotransform = georef.geotransform.map(|gt| scale_geotransform(gt, from, to));
        }
        let path = product_path(stem, &name.to_ascii_lowercase(), "tif");
        write_rgb_u8(&path, &rgb, &out_georef)?;
        info!("Wrote style {} to {:?}", name, path);
        products.push(OutputProduct {
            kind: ProductKind::Style,
            name: name.to_ascii_lowercase(),
            path,
        });
    }

    if specs.thumbnails && !products.is_empty() {
        debug!("Thumbnail mode: discarding raw mosaic {:?}", mosaic.path);
        return Ok(products);
    }

    let raw = if bands > 3 {
        TempPath::from_path(toolchain.reband(&mosaic.path, &[1, 2, 3])?)
    } else {
        mosaic.path
    };
    // a rebanded raw is always a GeoTIFF, whatever the mosaic was delivered as
    let ext = raw
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("tif")
        .to_string();
    let path = product_path(stem, "raw", &ext);
    persist(raw, &path)?;
    products.push(OutputProduct {
        kind: ProductKind::Raw,
        name: "raw".into(),
        path,
    });
    Ok(products)
}
