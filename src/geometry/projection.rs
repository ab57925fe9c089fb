/// Mean ground distance spanned by one degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.0;

pub fn latitude_from_dist(km: f64) -> f64 {
    km / KM_PER_DEGREE
}

/// Degrees of longitude spanning `km` at latitude `lat`.
pub fn longitude_from_dist(km: f64, lat: f64) -> f64 {
    km / (lat.abs().to_radians().cos() * KM_PER_DEGREE)
}

pub fn dist_from_latitude(deg: f64) -> f64 {
    deg * KM_PER_DEGREE
}

pub fn dist_from_longitude(deg: f64, lat: f64) -> f64 {
    deg * lat.abs().to_radians().cos() * KM_PER_DEGREE
}

/// EPSG code of the WGS84 UTM zone containing (lat, lon).
pub fn utm_epsg(lat: f64, lon: f64) -> u32 {
    let base = if lat > 0.0 { 32601 } else { 32701 };
    let zone = (((180.0 + lon) / 6.0).floor() as i64).clamp(0, 59) as u32;
    base + zone
}

pub fn epsg_crs(code: u32) -> String {
    format!("EPSG:{}", code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(40.7, -74.0, 32618)]
    #[case(-33.9, 18.4, 32734)]
    #[case(51.5, 0.1, 32631)]
    #[case(10.0, 180.0, 32660)]
    #[case(-5.0, -180.0, 32701)]
    fn utm_zone_lookup(#[case] lat: f64, #[case] lon: f64, #[case] expected: u32) {
        assert_eq!(utm_epsg(lat, lon), expected);
    }

    #[test]
    fn distance_conversions_invert() {
        let lat = 37.0;
        let deg = longitude_from_dist(5.0, lat);
        assert!((dist_from_longitude(deg, lat) - 5.0).abs() < 1e-9);
        assert!((dist_from_latitude(latitude_from_dist(2.5)) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn longitude_degrees_widen_away_from_equator() {
        assert!(longitude_from_dist(1.0, 60.0) > longitude_from_dist(1.0, 0.0));
        assert_eq!(longitude_from_dist(1.0, 45.0), longitude_from_dist(1.0, -45.0));
    }
}
