//! Geographic helpers: bounding boxes, distance/degree conversions, UTM zone
//! lookup and footprint set operations.
pub mod bbox;
pub mod footprint;
pub mod projection;

pub use bbox::BoundingBox;
pub use footprint::{FootprintError, overlap, parse_geojson_footprint, parse_wkt_footprint, union};
pub use projection::{KM_PER_DEGREE, latitude_from_dist, longitude_from_dist, utm_epsg};
