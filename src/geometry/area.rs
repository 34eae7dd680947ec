use geo::{Area, LineString, Polygon};

use super::projection::EARTH_RADIUS_M;

/// Build a geo polygon from (x, y) points. `Polygon::new` closes the ring.
pub fn to_polygon(points: &[(f64, f64)]) -> Polygon<f64> {
    let ring: LineString<f64> = points
        .iter()
        .map(|&(x, y)| geo::coord! { x: x, y: y })
        .collect();
    Polygon::new(ring, vec![])
}

/// Shoelace area of a polygon given in any planar units (normalized image space in practice)
///
/// The polygon is closed automatically if the last point differs from the first.
pub fn planar_area(points: &[(f64, f64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    to_polygon(points).unsigned_area()
}

/// Spherical polygon area in square meters for a ring of (lat, lon) points in degrees
///
/// Sums `(lon[i+1] - lon[i]) * (2 + sin(lat[i]) + sin(lat[i+1]))` around the
/// closed ring and scales by `R² / 2`.
pub fn geodesic_area(lat_lon: &[(f64, f64)]) -> f64 {
    if lat_lon.len() < 3 {
        return 0.0;
    }

    let n = lat_lon.len();
    let mut total = 0.0;
    for i in 0..n {
        let (lat1, lon1) = lat_lon[i];
        let (lat2, lon2) = lat_lon[(i + 1) % n];
        total += (lon2 - lon1).to_radians()
            * (2.0 + lat1.to_radians().sin() + lat2.to_radians().sin());
    }

    (total * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs()
}
