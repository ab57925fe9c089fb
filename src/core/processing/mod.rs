//! Raster post-processing: histogram statistics, color correction, band
//! algebra, thumbnail resizing and the chain that turns a mosaic into output
//! products.
pub mod color;
pub mod histogram;
pub mod indices;
pub mod postprocess;
pub mod resize;

pub use postprocess::{postprocess, product_stem};
