use geo::{Area, Coord, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};

use super::projection::{
    dist_from_latitude, dist_from_longitude, latitude_from_dist, longitude_from_dist,
};
use crate::error::{Error, Result};

/// Axis-aligned rectangle in longitude/latitude degrees.
///
/// Always satisfies `min < max` on both axes; every constructor enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let finite = [min_lon, min_lat, max_lon, max_lat]
            .iter()
            .all(|v| v.is_finite());
        if !finite || min_lon >= max_lon || min_lat >= max_lat {
            return Err(Error::InvalidBoundingBox(format!(
                "({}, {}, {}, {})",
                min_lon, min_lat, max_lon, max_lat
            )));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Box of `dlat` x `dlon` degrees centered on (lat, lon).
    pub fn from_center(lat: f64, lon: f64, dlat: f64, dlon: f64) -> Result<Self> {
        Self::new(
            lon - dlon / 2.0,
            lat - dlat / 2.0,
            lon + dlon / 2.0,
            lat + dlat / 2.0,
        )
    }

    /// Box with sides of roughly `km` kilometers centered on (lat, lon).
    pub fn from_scale(lat: f64, lon: f64, km: f64) -> Result<Self> {
        Self::from_center(
            lat,
            lon,
            latitude_from_dist(km),
            longitude_from_dist(km, lat),
        )
    }

    /// Parse `minlon,minlat,maxlon,maxlat`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidBoundingBox(format!("{}: {}", s, e)))?;
        match parts.as_slice() {
            [a, b, c, d] => Self::new(*a, *b, *c, *d),
            _ => Err(Error::InvalidBoundingBox(format!(
                "expected 4 comma-separated values, got '{}'",
                s
            ))),
        }
    }

    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }
    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }
    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }
    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    /// (lon, lat) of the center.
    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// Width and height in km, measured at the centroid latitude.
    pub fn side_distances(&self) -> (f64, f64) {
        let (_, lat) = self.centroid();
        (
            dist_from_longitude(self.max_lon - self.min_lon, lat),
            dist_from_latitude(self.max_lat - self.min_lat),
        )
    }

    /// Area in square degrees, the unit overlap fractions are computed in.
    pub fn area(&self) -> f64 {
        self.to_polygon().unsigned_area()
    }

    pub fn rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.min_lon,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lon,
                y: self.max_lat,
            },
        )
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.rect().to_polygon()
    }

    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![self.to_polygon()])
    }

    /// Smallest box enclosing `shape`, if it has any extent.
    pub fn enclosing(shape: &MultiPolygon<f64>) -> Option<Self> {
        use geo::BoundingRect;
        let rect = shape.bounding_rect()?;
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y).ok()
    }

    /// `[ulx, uly, lrx, lry]`, the corner order gdal_translate's `-projwin` expects.
    pub fn gdal_projwin(&self) -> [f64; 4] {
        [self.min_lon, self.max_lat, self.max_lon, self.min_lat]
    }

    /// Filename tag identifying this box.
    pub fn tag(&self) -> String {
        format!(
            "bbox{:.4}_{:.4}_{:.4}_{:.4}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }

    /// Rebuild the box around its centroid with sides `width_km` x `height_km`.
    pub fn with_sides(&self, width_km: f64, height_km: f64) -> Result<Self> {
        let (lon, lat) = self.centroid();
        Self::from_center(
            lat,
            lon,
            latitude_from_dist(height_km),
            longitude_from_dist(width_km, lat),
        )
    }

    /// Same centroid, both sides multiplied by `factor`.
    pub fn rescaled(&self, factor: f64) -> Result<Self> {
        let (dx, dy) = self.side_distances();
        self.with_sides(dx * factor, dy * factor)
    }

    /// Scale both sides by `rescaling`, then clamp each side to `[min_km, max_km]`.
    /// Returns `self` unchanged when no adjustment applies.
    pub fn enforce_size(
        &self,
        rescaling: f64,
        min_km: Option<f64>,
        max_km: Option<f64>,
    ) -> Result<Self> {
        if rescaling == 1.0 && min_km.is_none() && max_km.is_none() {
            return Ok(*self);
        }
        let (dx, dy) = self.side_distances();
        let (mut dx, mut dy) = (dx * rescaling, dy * rescaling);
        if let Some(min) = min_km {
            dx = dx.max(min);
            dy = dy.max(min);
        }
        if let Some(max) = max_km {
            dx = dx.min(max);
            dy = dy.min(max);
        }
        self.with_sides(dx, dy)
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.5}, {:.5}, {:.5}, {:.5})",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_boxes() {
        assert!(BoundingBox::new(1.0, 0.0, 1.0, 1.0).is_err());
        assert!(BoundingBox::new(0.0, 2.0, 1.0, 1.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, f64::NAN, 1.0).is_err());
    }

    #[test]
    fn from_scale_spans_requested_distance() {
        let bbox = BoundingBox::from_scale(45.0, 10.0, 2.0).unwrap();
        let (dx, dy) = bbox.side_distances();
        assert!((dx - 2.0).abs() < 1e-6);
        assert!((dy - 2.0).abs() < 1e-6);
        let (lon, lat) = bbox.centroid();
        assert!((lon - 10.0).abs() < 1e-12);
        assert!((lat - 45.0).abs() < 1e-12);
    }

    #[test]
    fn parse_accepts_comma_list() {
        let bbox = BoundingBox::parse("-122.5, 37.7,-122.4,37.8").unwrap();
        assert_eq!(bbox.min_lon(), -122.5);
        assert_eq!(bbox.max_lat(), 37.8);
        assert!(BoundingBox::parse("1,2,3").is_err());
        assert!(BoundingBox::parse("a,b,c,d").is_err());
    }

    #[test]
    fn projwin_orders_upper_left_first() {
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0).unwrap();
        assert_eq!(bbox.gdal_projwin(), [1.0, 4.0, 3.0, 2.0]);
        assert_eq!(bbox.tag(), "bbox1.0000_2.0000_3.0000_4.0000");
    }

    #[test]
    fn enforce_size_clamps_to_bounds() {
        let bbox = BoundingBox::from_scale(0.0, 0.0, 1.0).unwrap();
        let grown = bbox.enforce_size(1.0, Some(5.0), None).unwrap();
        let (dx, dy) = grown.side_distances();
        assert!((dx - 5.0).abs() < 1e-6 && (dy - 5.0).abs() < 1e-6);

        let shrunk = BoundingBox::from_scale(0.0, 0.0, 50.0)
            .unwrap()
            .enforce_size(2.0, None, Some(20.0))
            .unwrap();
        let (dx, _) = shrunk.side_distances();
        assert!((dx - 20.0).abs() < 1e-6);

        assert_eq!(bbox.enforce_size(1.0, None, None).unwrap(), bbox);
    }

    #[test]
    fn rescaled_keeps_the_centroid() {
        let bbox = BoundingBox::from_scale(30.0, 20.0, 2.0).unwrap();
        let doubled = bbox.rescaled(2.0).unwrap();
        let (dx, dy) = doubled.side_distances();
        assert!((dx - 4.0).abs() < 1e-6 && (dy - 4.0).abs() < 1e-6);
        let (lon, lat) = doubled.centroid();
        assert!((lon - 20.0).abs() < 1e-9 && (lat - 30.0).abs() < 1e-9);
    }
}
