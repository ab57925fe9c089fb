use gdal::raster::ResampleAlg;
use gdal::{Dataset, errors::GdalError as GdalCrateError};
use ndarray::{Array2, Array3, Axis};
use std::path::Path;
use thiserror::Error;

/// Errors encountered when reading or writing rasters through GDAL
#[derive(Debug, Error)]
pub enum GdalError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalCrateError),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Dimension mismatch: expected {0}x{1}, got {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),
}

/// Geotransform and projection carried from a mosaic to its derived products.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Georef {
    /// Affine coefficients ([origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height])
    pub geotransform: Option<[f64; 6]>,
    /// Projection in WKT format; empty when the raster is not georeferenced
    pub projection: String,
}

/// Metadata extracted from a GDAL-supported raster
#[derive(Debug, Clone)]
pub struct RasterMetadata {
    /// Width (pixels) of the raster
    pub size_x: usize,
    /// Height (lines) of the raster
    pub size_y: usize,
    /// Number of raster bands
    pub bands: usize,
    pub georef: Georef,
    /// EPSG code parsed from the projection's authority tag
    pub epsg: Option<u32>,
}

/// Reader for GeoTIFFs and other GDAL rasters
pub struct RasterReader {
    dataset: Dataset,
    pub metadata: RasterMetadata,
}

// Helper to extract EPSG code from WKT authority tag
pub fn parse_epsg(wkt: &str) -> Option<u32> {
    if let Some(code) = wkt.strip_prefix("EPSG:") {
        return code.trim().parse().ok();
    }
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    let idx = wkt.rfind(KEY)?;
    let start = idx + KEY.len();
    let end = wkt[start..].find('"')?;
    wkt[start..start + end].parse().ok()
}

impl RasterReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GdalError> {
        let dataset = Dataset::open(path.as_ref())?;
        let (size_x, size_y) = dataset.raster_size();
        let bands = dataset.raster_count() as usize;
        if bands == 0 {
            return Err(GdalError::UnsupportedFormat("No raster bands found".into()));
        }
        let projection = dataset.projection();
        let epsg = parse_epsg(&projection);
        Ok(RasterReader {
            metadata: RasterMetadata {
                size_x: size_x as usize,
                size_y: size_y as usize,
                bands,
                georef: Georef {
                    geotransform: dataset.geo_transform().ok(),
                    projection,
                },
                epsg,
            },
            dataset,
        })
    }

    /// Read a single band (1-based index) as an f64 ndarray of shape (height, width)
    pub fn read_band(&self, index: usize) -> Result<Array2<f64>, GdalError> {
        if index == 0 || index > self.metadata.bands {
            return Err(GdalError::UnsupportedFormat(format!(
                "Band index {} out of range",
                index
            )));
        }
        let band = self.dataset.rasterband(index)?;
        let window = (self.metadata.size_x, self.metadata.size_y);
        let buf = band.read_as::<f64>((0, 0), window, window, Some(ResampleAlg::NearestNeighbour))?;
        let data_vec = buf.data().to_vec();
        let len = data_vec.len();
        Array2::from_shape_vec((self.metadata.size_y, self.metadata.size_x), data_vec).map_err(
            |_| {
                GdalError::DimensionMismatch(
                    self.metadata.size_x,
                    self.metadata.size_y,
                    len,
                    1,
                )
            },
        )
    }

    /// Read every band into a `(bands, rows, cols)` stack
    pub fn read_stack(&self) -> Result<Array3<f64>, GdalError> {
        let mut stack = Array3::<f64>::zeros((
            self.metadata.bands,
            self.metadata.size_y,
            self.metadata.size_x,
        ));
        for (i, mut plane) in stack.axis_iter_mut(Axis(0)).enumerate() {
            plane.assign(&self.read_band(i + 1)?);
        }
        Ok(stack)
    }

    pub fn georef(&self) -> &Georef {
        &self.metadata.georef
    }
}
