//! Street frontage detection
//!
//! Probe points are laid on a circle around the lot, snapped to the road network,
//! and the lot boundary points nearest to the snapped road points form the front.

use std::cmp::Ordering;
use std::f64::consts::PI;
use thiserror::Error;

use crate::api::{Geocoder, RoadSnapper, SnappedPoint};
use crate::geometry::{Projector, haversine_distance};

pub const MIN_PROBE_POINTS: usize = 7;
pub const MAX_PROBE_POINTS: usize = 15;

#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum FrontageError {
    #[error("no probe point could be snapped to a road")]
    NoSnappedPoints,

    #[error("lot boundary is empty")]
    EmptyBoundary,
}

/// Vertex mean of a (lat, lon) ring
pub fn centroid(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (lat, lon) = points
        .iter()
        .fold((0.0, 0.0), |(a, b), &(lat, lon)| (a + lat, b + lon));
    Some((lat / n, lon / n))
}

/// Equally spaced points on the circle around `center` that passes through the
/// farthest boundary point. `num_points` is clamped to 7..=15.
pub fn probe_ring(center: (f64, f64), boundary: &[(f64, f64)], num_points: usize) -> Vec<(f64, f64)> {
    let n = num_points.clamp(MIN_PROBE_POINTS, MAX_PROBE_POINTS);
    let projector = Projector::new(center);

    let radius = boundary
        .iter()
        .map(|&(lat, lon)| {
            let (x, y) = projector.project(lat, lon);
            x.hypot(y)
        })
        .fold(0.0, f64::max);

    (0..n)
        .map(|i| {
            let theta = 2.0 * PI * i as f64 / n as f64;
            projector.unproject(radius * theta.cos(), radius * theta.sin())
        })
        .collect()
}

/// Snap each probe to the nearest road. Points whose request fails are skipped.
pub fn snap_to_road(snapper: &dyn RoadSnapper, points: &[(f64, f64)]) -> Vec<SnappedPoint> {
    points
        .iter()
        .filter_map(|&point| match snapper.snap(point) {
            Ok(snapped) => Some(snapped),
            Err(e) => {
                tracing::warn!(lat = point.0, lon = point.1, error = %e, "Road snap failed, skipping probe");
                None
            }
        })
        .collect()
}

/// Fill empty street names by reverse geocoding the snapped location
///
/// Lookup failures leave the name empty.
pub fn fill_street_names(geocoder: &dyn Geocoder, snapped: &mut [SnappedPoint]) {
    for point in snapped.iter_mut().filter(|p| p.street.is_empty()) {
        let (lat, lon) = point.location;
        match geocoder.reverse(lat, lon) {
            Ok(Some(address)) => {
                if let Some(road) = address.road {
                    point.street = road;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(lat, lon, error = %e, "Reverse geocoding failed"),
        }
    }
}

/// Distinct non-empty street names in first-seen order
pub fn street_names(snapped: &[SnappedPoint]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for p in snapped {
        if !p.street.is_empty() && !names.contains(&p.street) {
            names.push(p.street.clone());
        }
    }
    names
}

/// Indices of the `k` boundary points closest to any snapped road point, nearest first
///
/// Ties are broken by boundary index, so the result does not depend on the order of `snapped`.
pub fn select_frontage(
    boundary: &[(f64, f64)],
    snapped: &[(f64, f64)],
    k: usize,
) -> Result<Vec<usize>, FrontageError> {
    if boundary.is_empty() {
        return Err(FrontageError::EmptyBoundary);
    }
    if snapped.is_empty() {
        return Err(FrontageError::NoSnappedPoints);
    }

    let distances: Vec<Vec<f64>> = boundary
        .iter()
        .map(|&(blat, blon)| {
            snapped
                .iter()
                .map(|&(slat, slon)| haversine_distance(blat, blon, slat, slon))
                .collect()
        })
        .collect();

    let mut nearest: Vec<(usize, f64)> = distances
        .iter()
        .enumerate()
        .map(|(i, row)| (i, row.iter().copied().fold(f64::INFINITY, f64::min)))
        .collect();

    nearest.sort_by(|a, b| match a.1.total_cmp(&b.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });

    Ok(nearest.into_iter().take(k).map(|(i, _)| i).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Address;
    use anyhow::{Result, bail};

    // ~20 m square near São Paulo
    fn boundary() -> Vec<(f64, f64)> {
        vec![
            (-23.55000, -46.63000),
            (-23.55000, -46.62980),
            (-23.55018, -46.62980),
            (-23.55018, -46.63000),
        ]
    }

    #[test]
    fn test_probe_ring_radius_and_count() {
        let b = boundary();
        let center = centroid(&b).unwrap();
        let ring = probe_ring(center, &b, 12);
        assert_eq!(ring.len(), 12);

        let max_r = b
            .iter()
            .map(|&(lat, lon)| haversine_distance(center.0, center.1, lat, lon))
            .fold(0.0, f64::max);
        for &(lat, lon) in &ring {
            let r = haversine_distance(center.0, center.1, lat, lon);
            assert!((r - max_r).abs() / max_r < 0.01, "r={} max={}", r, max_r);
        }
    }

    #[test]
    fn test_probe_ring_clamps_count() {
        let b = boundary();
        let center = centroid(&b).unwrap();
        assert_eq!(probe_ring(center, &b, 2).len(), MIN_PROBE_POINTS);
        assert_eq!(probe_ring(center, &b, 40).len(), MAX_PROBE_POINTS);
    }

    #[test]
    fn test_select_frontage_picks_road_side() {
        let b = boundary();
        // Road runs north of the lot
        let road = vec![(-23.54990, -46.63010), (-23.54990, -46.62970)];
        let front = select_frontage(&b, &road, 2).unwrap();
        let mut sorted = front.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1]);
    }

    #[test]
    fn test_select_frontage_independent_of_snapped_order() {
        let b = boundary();
        let mut road = vec![
            (-23.54990, -46.63010),
            (-23.55030, -46.62990),
            (-23.54995, -46.62975),
        ];
        let first = select_frontage(&b, &road, 2).unwrap();
        road.reverse();
        assert_eq!(select_frontage(&b, &road, 2).unwrap(), first);
        road.rotate_left(1);
        assert_eq!(select_frontage(&b, &road, 2).unwrap(), first);
    }

    #[test]
    fn test_select_frontage_without_snaps_fails() {
        assert_eq!(
            select_frontage(&boundary(), &[], 2),
            Err(FrontageError::NoSnappedPoints)
        );
        assert_eq!(
            select_frontage(&[], &[(0.0, 0.0)], 2),
            Err(FrontageError::EmptyBoundary)
        );
    }

    struct FlakySnapper;

    impl RoadSnapper for FlakySnapper {
        fn snap(&self, point: (f64, f64)) -> Result<SnappedPoint> {
            if point.1 > -46.6299 {
                bail!("timeout");
            }
            Ok(SnappedPoint {
                location: (point.0 + 0.0001, point.1),
                street: String::new(),
                distance_m: Some(11.0),
            })
        }
    }

    struct FixedGeocoder;

    impl Geocoder for FixedGeocoder {
        fn reverse(&self, _lat: f64, _lon: f64) -> Result<Option<Address>> {
            Ok(Some(Address {
                road: Some("Rua Augusta".to_string()),
                ..Default::default()
            }))
        }
    }

    #[test]
    fn test_snap_to_road_skips_failures() {
        let probes = vec![(-23.55, -46.6301), (-23.55, -46.6290), (-23.55, -46.6302)];
        let mut snapped = snap_to_road(&FlakySnapper, &probes);
        assert_eq!(snapped.len(), 2);

        fill_street_names(&FixedGeocoder, &mut snapped);
        assert!(snapped.iter().all(|p| p.street == "Rua Augusta"));
        assert_eq!(street_names(&snapped), vec!["Rua Augusta"]);
    }
}
