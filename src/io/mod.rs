//! I/O layer: GDAL raster reading, GeoTIFF `writers`, and the external
//! raster `toolchain` used for reprojection, cropping and merging.
pub mod gdal;
pub use self::gdal::{GdalError, Georef, RasterMetadata, RasterReader};

pub mod toolchain;
pub use toolchain::{GdalToolchain, RasterToolchain, ToolchainError};

pub mod writers;
