//! GeoTIFF writers for styled, index and fixture rasters.
pub mod tiff;

pub use tiff::{write_f32_band, write_rgb_u8, write_tiff_stack};
