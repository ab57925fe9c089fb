use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use ndarray::{Array3, Axis};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Long side, in pixels, of thumbnail products.
pub const THUMBNAIL_SIZE: usize = 512;

pub fn calculate_resize_dimensions(
    original_cols: usize,
    original_rows: usize,
    target_size: usize,
) -> (usize, usize) {
    let short_side = original_rows.min(original_cols);
    let long_side = original_rows.max(original_cols);

    if target_size >= long_side {
        return (original_cols, original_rows);
    }

    let scale_factor = target_size as f64 / long_side as f64;
    let new_short_side = ((short_side as f64 * scale_factor).round() as usize).max(1);

    if original_cols > original_rows {
        (target_size, new_short_side)
    } else {
        (new_short_side, target_size)
    }
}

/// Resize a `(3, rows, cols)` RGB stack so its long side is at most
/// `target_size`, with Lanczos3. Smaller images come back unchanged.
pub fn resize_rgb_u8(img: &Array3<u8>, target_size: usize) -> Result<Array3<u8>> {
    let (bands, rows, cols) = img.dim();
    if bands != 3 {
        return Err(Error::Processing(format!(
            "RGB resize expects 3 bands, got {}",
            bands
        )));
    }
    let (new_cols, new_rows) = calculate_resize_dimensions(cols, rows, target_size);
    if (new_cols, new_rows) == (cols, rows) {
        warn!(
            "Thumbnail size {} is not smaller than {}x{}; keeping original dimensions",
            target_size, cols, rows
        );
        return Ok(img.clone());
    }
    info!(
        "Original size: {}x{}, New size: {}x{}",
        cols, rows, new_cols, new_rows
    );

    // fast_image_resize works on interleaved RGB
    let mut interleaved = Vec::with_capacity(rows * cols * 3);
    for r in 0..rows {
        for c in 0..cols {
            for b in 0..3 {
                interleaved.push(img[[b, r, c]]);
            }
        }
    }

    let resize_options =
        ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
    let mut resizer = Resizer::new();
    let src_image = Image::from_vec_u8(cols as u32, rows as u32, interleaved, PixelType::U8x3)
        .map_err(Error::external)?;
    let mut dst_image = Image::new(new_cols as u32, new_rows as u32, PixelType::U8x3);
    resizer
        .resize(&src_image, &mut dst_image, &resize_options)
        .map_err(Error::external)?;

    let data = dst_image.into_vec();
    let planar = Array3::from_shape_vec((new_rows, new_cols, 3), data)
        .map_err(Error::external)?
        .permuted_axes([2, 0, 1]);
    Ok(planar.as_standard_layout().into_owned())
}

/// Geotransform for a raster resampled from `from` to `to` (cols, rows).
pub fn scale_geotransform(gt: [f64; 6], from: (usize, usize), to: (usize, usize)) -> [f64; 6] {
    let sx = from.0 as f64 / to.0 as f64;
    let sy = from.1 as f64 / to.1 as f64;
    [gt[0], gt[1] * sx, gt[2] * sy, gt[3], gt[4] * sx, gt[5] * sy]
}

/// Number of pixels in the long side of a stack.
pub fn long_side(img: &Array3<u8>) -> usize {
    img.len_of(Axis(1)).max(img.len_of(Axis(2)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_keep_aspect_ratio() {
        assert_eq!(calculate_resize_dimensions(2048, 1024, 512), (512, 256));
        assert_eq!(calculate_resize_dimensions(1000, 3000, 512), (171, 512));
        assert_eq!(calculate_resize_dimensions(300, 200, 512), (300, 200));
    }

    #[test]
    fn resize_shrinks_long_side() {
        let img = Array3::<u8>::from_elem((3, 40, 80), 200);
        let out = resize_rgb_u8(&img, 20).unwrap();
        assert_eq!(out.dim(), (3, 10, 20));
        assert_eq!(long_side(&out), 20);
        assert!(out.iter().all(|&v| (v as i16 - 200).abs() <= 1));
    }

    #[test]
    fn small_images_pass_through() {
        let img = Array3::<u8>::from_elem((3, 4, 6), 7);
        assert_eq!(resize_rgb_u8(&img, 512).unwrap(), img);
    }

    #[test]
    fn geotransform_scales_pixel_size() {
        let gt = [100.0, 10.0, 0.0, 500.0, 0.0, -10.0];
        let scaled = scale_geotransform(gt, (80, 40), (20, 10));
        assert_eq!(scaled, [100.0, 40.0, 0.0, 500.0, 0.0, -40.0]);
    }
}
