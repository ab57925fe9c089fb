#![doc = r#"
satgrab: provider-agnostic satellite imagery acquisition.

Give it a bounding box and an image specification; it searches a provider's
catalog, compiles the hits into scenes that cover the box well enough, activates
and downloads every scene concurrently, reconciles each scene into one
georeferenced mosaic, and renders color-corrected styles and landcover indices
as GeoTIFFs. It powers the `satgrab` CLI and can be embedded in your own
Rust applications.

Requirements
------------
- GDAL development headers and runtime, plus the `gdalwarp` and
  `gdal_translate` utilities on `PATH`.
- Rust 2024 edition toolchain and a Tokio runtime.
- Provider credentials in the environment: `PL_API_KEY` (Planet),
  `DG_API_TOKEN` (DigitalGlobe).

Quick start: pull the latest scene
----------------------------------
```rust,no_run
use std::sync::Arc;

use satgrab::{BoundingBox, CancelToken, GdalToolchain, ImageSpecs, Pipeline, ProviderKind};

#[tokio::main]
async fn main() -> satgrab::Result<()> {
    let specs = ImageSpecs::layered(None, &serde_json::Map::new())?;
    let provider = satgrab::providers::build(ProviderKind::Planet, &specs)?;
    let pipeline = Pipeline::new(provider, Arc::new(GdalToolchain::new()), "tmp-staging");

    let bbox = BoundingBox::from_scale(37.77, -122.42, 2.0)?;
    for outcome in pipeline.pull(&bbox, &CancelToken::new()).await? {
        match outcome {
            Ok(scene) => println!("{:?}", scene.paths()),
            Err(failure) => eprintln!("{failure}"),
        }
    }
    Ok(())
}
```

Layered specs
-------------
Defaults, then a JSON file, then explicit overrides. Keys the common struct
doesn't know are passed through to the provider.

```rust,no_run
use std::path::Path;
use serde_json::json;
use satgrab::ImageSpecs;

fn load() -> satgrab::Result<ImageSpecs> {
    let overrides = json!({"N_images": 3, "skip_days": 30, "item_types": ["PSScene4Band"]});
    let serde_json::Value::Object(overrides) = overrides else { unreachable!() };
    ImageSpecs::layered(Some(Path::new("specs.json")), &overrides)
}
```

Several providers at once
-------------------------
```rust,no_run
use std::path::Path;
use std::sync::Arc;

use satgrab::api::handler::{GrabberHandler, LocalStore};
use satgrab::{BoundingBox, CancelToken, GdalToolchain, ImageSpecs, ProviderKind};

async fn grab_all(specs: &ImageSpecs, bbox: &BoundingBox) -> satgrab::Result<()> {
    let handler = GrabberHandler::from_kinds(
        &[ProviderKind::Planet, ProviderKind::Landsat],
        specs,
        Arc::new(GdalToolchain::new()),
        Path::new("tmp-staging"),
    )?
    .with_store(Arc::new(LocalStore::new("/srv/imagery")));
    let outcomes = handler.grab(bbox, &CancelToken::new()).await?;
    println!("{} scene(s)", outcomes.len());
    Ok(())
}
```

Error handling
--------------
All public functions return `satgrab::Result<T>`. Per-record failures
(`Error::is_transient`) are logged and the record dropped; configuration
errors surface immediately; a failed scene is reported next to its siblings.

```rust,no_run
use satgrab::{Error, Pipeline, BoundingBox, CancelToken};

async fn by_id(p: &Pipeline, bbox: &BoundingBox) {
    match p.pull_by_id(bbox, "20240630_101112_0f12", None, &CancelToken::new()).await {
        Ok(scene) => println!("{:?}", scene.paths()),
        Err(Error::NotFound { id }) => eprintln!("no record {id}"),
        Err(Error::BandMap { product_type, asset_type }) => {
            eprintln!("unsupported {product_type}/{asset_type}")
        }
        Err(other) => eprintln!("{other}"),
    }
}
```

Useful modules
--------------
- [`api`]: `Pipeline` and the multi-provider `GrabberHandler`.
- [`providers`]: the `Provider` trait and the Planet, DigitalGlobe and Landsat implementations.
- [`core`]: specs, scene compilation, mosaic reconciliation, color and index post-processing.
- [`geometry`]: bounding boxes, footprints, UTM zones.
- [`io`]: GDAL raster reading/writing and the external raster toolchain.
- [`error`]: crate-level `Error` and `Result`.
"#]

pub mod api;
pub mod core;
pub mod error;
pub mod geometry;
pub mod io;
pub mod providers;
pub mod types;

// Curated public API surface
pub use error::{Error, Result};
pub use types::{ProductKind, ProviderKind};

pub use core::cancel::CancelToken;
pub use core::model::{CatalogRecord, OutputProduct, RecordSummary, Scene, SceneRecord};
pub use core::specs::{ImageSpecs, SpecAdjustment};
pub use geometry::BoundingBox;
pub use io::toolchain::{GdalToolchain, RasterToolchain};
pub use providers::Provider;

pub use api::{DEFAULT_STAGING_DIR, Pipeline, PullReport, SceneFailure, SceneOutcome};
