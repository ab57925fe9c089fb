use gdal::DriverManager;
use gdal::raster::{Buffer, ColorInterpretation, GdalType};
use ndarray::{Array2, Array3, Axis};
use std::path::Path;

use crate::io::gdal::{GdalError, Georef};

/// Write a `(bands, rows, cols)` stack as a GeoTIFF carrying `georef`.
pub fn write_tiff_stack<T>(output: &Path, stack: &Array3<T>, georef: &Georef) -> Result<(), GdalError>
where
    T: GdalType + Copy,
{
    write_stack_with(output, stack, georef, &[])
}

fn write_stack_with<T>(
    output: &Path,
    stack: &Array3<T>,
    georef: &Georef,
    interpretations: &[ColorInterpretation],
) -> Result<(), GdalError>
where
    T: GdalType + Copy,
{
    let (bands, rows, cols) = stack.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut ds = driver.create_with_band_type::<T, _>(output, cols, rows, bands)?;
    if let Some(gt) = georef.geotransform {
        ds.set_geo_transform(&gt)?;
    }
    if !georef.projection.is_empty() {
        ds.set_projection(&georef.projection)?;
    }
    for (i, plane) in stack.axis_iter(Axis(0)).enumerate() {
        let mut band = ds.rasterband(i + 1)?;
        if let Some(interp) = interpretations
            .get(i)
            .and_then(|c| ColorInterpretation::from_c_int(c.c_int()))
        {
            band.set_color_interpretation(interp)?;
        }
        let data: Vec<T> = plane.iter().copied().collect();
        let mut buf = Buffer::new((cols, rows), data);
        band.write((0, 0), (cols, rows), &mut buf)?;
    }
    Ok(())
}

/// 8-bit RGB GeoTIFF with red/green/blue color interpretation.
pub fn write_rgb_u8(output: &Path, rgb: &Array3<u8>, georef: &Georef) -> Result<(), GdalError> {
    let (bands, rows, cols) = rgb.dim();
    if bands != 3 {
        return Err(GdalError::DimensionMismatch(3, rows * cols, bands, rows * cols));
    }
    write_stack_with(
        output,
        rgb,
        georef,
        &[
            ColorInterpretation::RedBand,
            ColorInterpretation::GreenBand,
            ColorInterpretation::BlueBand,
        ],
    )
}

/// Single-band float32 GeoTIFF.
pub fn write_f32_band(output: &Path, data: &Array2<f32>, georef: &Georef) -> Result<(), GdalError> {
    let stack = data.clone().insert_axis(Axis(0));
    write_tiff_stack(output, &stack, georef)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::gdal::RasterReader;

    fn utm_georef() -> Georef {
        Georef {
            geotransform: Some([500000.0, 10.0, 0.0, 4100000.0, 0.0, -10.0]),
            projection: String::new(),
        }
    }

    #[test]
    fn stack_round_trips_through_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let stack = Array3::from_shape_fn((4, 3, 5), |(b, r, c)| (b * 100 + r * 10 + c) as u16);
        write_tiff_stack(&path, &stack, &utm_georef()).unwrap();

        let reader = RasterReader::open(&path).unwrap();
        assert_eq!(reader.metadata.bands, 4);
        assert_eq!((reader.metadata.size_x, reader.metadata.size_y), (5, 3));
        assert_eq!(reader.georef().geotransform, utm_georef().geotransform);
        let back = reader.read_stack().unwrap();
        assert_eq!(back[[3, 2, 4]], 324.0);
    }

    #[test]
    fn rgb_writer_requires_three_bands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.tif");
        let two = Array3::<u8>::zeros((2, 2, 2));
        assert!(write_rgb_u8(&path, &two, &Georef::default()).is_err());
        let three = Array3::<u8>::from_elem((3, 2, 2), 9);
        write_rgb_u8(&path, &three, &Georef::default()).unwrap();
        assert_eq!(RasterReader::open(&path).unwrap().metadata.bands, 3);
    }
}
