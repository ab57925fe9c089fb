//! Footprint set operations over `geo` multipolygons, plus parsers for the
//! GeoJSON and WKT footprints providers hand back.
use geo::{Area, BooleanOps, Geometry, MultiPolygon};
use thiserror::Error;

use super::bbox::BoundingBox;

#[derive(Debug, Error)]
pub enum FootprintError {
    #[error("GeoJSON footprint error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("WKT footprint error: {0}")]
    Wkt(#[from] gdal::errors::GdalError),
    #[error("Footprint is not polygonal: {0}")]
    NotPolygonal(&'static str),
}

/// Geometric union of all footprints.
pub fn union<'a, I>(footprints: I) -> MultiPolygon<f64>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    footprints
        .into_iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, fp| {
            if acc.0.is_empty() {
                fp.clone()
            } else {
                acc.union(fp)
            }
        })
}

/// Intersection of `bbox` with the union of `footprints`, and that
/// intersection's area as a fraction of the bbox area.
pub fn overlap<'a, I>(bbox: &BoundingBox, footprints: I) -> (MultiPolygon<f64>, f64)
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    let combined = union(footprints);
    if combined.0.is_empty() {
        return (combined, 0.0);
    }
    let inter = bbox.to_multi_polygon().intersection(&combined);
    let frac = inter.unsigned_area() / bbox.area();
    (inter, frac)
}

fn into_multi_polygon(geometry: Geometry<f64>) -> Result<MultiPolygon<f64>, FootprintError> {
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Ok(mp),
        Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Point(_) => Err(FootprintError::NotPolygonal("point")),
        Geometry::LineString(_) | Geometry::MultiLineString(_) | Geometry::Line(_) => {
            Err(FootprintError::NotPolygonal("line"))
        }
        _ => Err(FootprintError::NotPolygonal("other")),
    }
}

/// Parse a GeoJSON geometry object (`{"type": "Polygon", "coordinates": ...}`).
pub fn parse_geojson_footprint(
    value: &serde_json::Value,
) -> Result<MultiPolygon<f64>, FootprintError> {
    let geometry = geojson::Geometry::from_json_value(value.clone())?;
    let geometry = Geometry::<f64>::try_from(geometry)?;
    into_multi_polygon(geometry)
}

/// Parse a WKT footprint through OGR.
pub fn parse_wkt_footprint(wkt: &str) -> Result<MultiPolygon<f64>, FootprintError> {
    let geometry = gdal::vector::Geometry::from_wkt(wkt)?.to_geo()?;
    into_multi_polygon(geometry)
}

/// GeoJSON geometry for `bbox`, as sent in catalog search filters.
pub fn bbox_geojson(bbox: &BoundingBox) -> serde_json::Value {
    let value = geojson::Value::from(&bbox.to_polygon());
    serde_json::Value::Object(geojson::JsonObject::from(&geojson::Geometry::new(value)))
}
