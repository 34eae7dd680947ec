//! WGS84 to UTM conversion
//!
//! Projection math is delegated to proj4rs; this module only picks the zone,
//! builds the proj string and keeps per-point failures from spoiling a list.

use anyhow::{Result, anyhow, bail};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{LotError, LotResult};

const WGS84: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Latitude band letters, 8 degrees each starting at 80S. X covers 72N..84N.
const BAND_LETTERS: &[u8] = b"CDEFGHJKLMNPQRSTUVWX";

/// A point in a UTM zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtmCoord {
    pub easting: f64,
    pub northing: f64,
    pub zone_number: u8,
    pub zone_letter: char,
}

/// A converted lot point: UTM position plus optional elevation in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub easting: f64,
    pub northing: f64,
    pub elevation: Option<f64>,
    pub zone_number: u8,
    pub zone_letter: char,
}

/// Result of converting a lot's boundary to metric coordinates
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricConversion {
    /// One row per input point; `None` where the point could not be converted
    pub rows: Vec<Option<MetricPoint>>,
    /// Rows whose zone differs from the first converted row's zone
    pub zone_mismatches: usize,
}

impl MetricConversion {
    /// Converted rows only, in input order
    pub fn valid_rows(&self) -> impl Iterator<Item = &MetricPoint> {
        self.rows.iter().flatten()
    }
}

/// UTM zone number for a longitude: `floor((lon + 180) / 6) + 1`, in 1..=60
pub fn zone_number(lon: f64) -> u8 {
    let zone = ((lon + 180.0) / 6.0).floor() as i64 + 1;
    zone.clamp(1, 60) as u8
}

/// Latitude band letter, or `None` outside the UTM range (80S..84N)
pub fn zone_letter(lat: f64) -> Option<char> {
    if !(-80.0..=84.0).contains(&lat) {
        return None;
    }
    let index = (((lat + 80.0) / 8.0).floor() as usize).min(BAND_LETTERS.len() - 1);
    Some(BAND_LETTERS[index] as char)
}

fn utm_proj(zone: u8, south: bool) -> Result<Proj> {
    let definition = format!(
        "+proj=utm +zone={}{} +datum=WGS84 +units=m +no_defs",
        zone,
        if south { " +south" } else { "" }
    );
    Proj::from_proj_string(&definition)
        .map_err(|e| anyhow!("Invalid UTM projection for zone {zone}: {e:?}"))
}

fn project(source: &Proj, target: &Proj, lat: f64, lon: f64) -> Result<(f64, f64)> {
    // proj4rs takes geographic coordinates in radians
    let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
    transform(source, target, &mut point).map_err(|e| anyhow!("UTM transform failed: {e:?}"))?;
    if !point.0.is_finite() || !point.1.is_finite() {
        bail!("UTM transform produced non-finite coordinates");
    }
    Ok((point.0, point.1))
}

/// Convert one (lat, lon) point to UTM
pub fn to_metric(lat: f64, lon: f64) -> Result<UtmCoord> {
    if !lat.is_finite() || !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        bail!("Coordinate out of range: ({lat}, {lon})");
    }
    let zone_letter =
        zone_letter(lat).ok_or_else(|| anyhow!("Latitude {lat} is outside the UTM range"))?;
    let zone_number = zone_number(lon);

    let source = Proj::from_proj_string(WGS84).map_err(|e| anyhow!("Invalid WGS84 definition: {e:?}"))?;
    let target = utm_proj(zone_number, lat < 0.0)?;
    let (easting, northing) = project(&source, &target, lat, lon)?;

    Ok(UtmCoord {
        easting,
        northing,
        zone_number,
        zone_letter,
    })
}

/// Convert a lot's (lat, lon) list, pairing each point with its elevation
///
/// A point that cannot be converted yields a `None` row. Points spread over
/// more than one zone are counted and logged but do not fail the conversion.
///
/// # Errors
/// Fails when `points` and `elevations` differ in length.
pub fn convert_point_list(
    points: &[(f64, f64)],
    elevations: &[Option<f64>],
) -> LotResult<MetricConversion> {
    if points.len() != elevations.len() {
        return Err(LotError::LengthMismatch(format!(
            "{} points, {} elevations",
            points.len(),
            elevations.len()
        )));
    }

    let source = Proj::from_proj_string(WGS84).ok();
    let mut targets: HashMap<(u8, bool), Option<Proj>> = HashMap::new();

    let rows: Vec<Option<MetricPoint>> = points
        .iter()
        .zip(elevations)
        .map(|(&(lat, lon), &elevation)| {
            let source = source.as_ref()?;
            let letter = zone_letter(lat)?;
            if !(-180.0..=180.0).contains(&lon) {
                return None;
            }
            let zone = zone_number(lon);
            let target = targets
                .entry((zone, lat < 0.0))
                .or_insert_with(|| utm_proj(zone, lat < 0.0).ok())
                .as_ref()?;

            match project(source, target, lat, lon) {
                Ok((easting, northing)) => Some(MetricPoint {
                    easting,
                    northing,
                    elevation,
                    zone_number: zone,
                    zone_letter: letter,
                }),
                Err(e) => {
                    tracing::warn!(lat, lon, error = %e, "Point could not be converted to UTM");
                    None
                }
            }
        })
        .collect();

    let reference = rows.iter().flatten().next().map(|r| r.zone_number);
    let zone_mismatches = match reference {
        Some(zone) => rows
            .iter()
            .flatten()
            .filter(|r| r.zone_number != zone)
            .count(),
        None => 0,
    };
    if zone_mismatches > 0 {
        tracing::warn!(
            zone_mismatches,
            "Lot points span more than one UTM zone; check upstream coordinates"
        );
    }

    Ok(MetricConversion {
        rows,
        zone_mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_number() {
        assert_eq!(zone_number(-180.0), 1);
        assert_eq!(zone_number(-46.63), 23);
        assert_eq!(zone_number(3.0), 31);
        assert_eq!(zone_number(180.0), 60);
    }

    #[test]
    fn test_zone_letter() {
        assert_eq!(zone_letter(-23.55), Some('K'));
        assert_eq!(zone_letter(37.77), Some('S'));
        assert_eq!(zone_letter(0.0), Some('N'));
        assert_eq!(zone_letter(83.0), Some('X'));
        assert_eq!(zone_letter(85.0), None);
        assert_eq!(zone_letter(-81.0), None);
    }

    #[test]
    fn test_to_metric_central_meridian() {
        // On the central meridian of zone 31 (3E) at the equator: easting is the false easting
        let utm = to_metric(0.0, 3.0).unwrap();
        assert_eq!(utm.zone_number, 31);
        assert_eq!(utm.zone_letter, 'N');
        assert!((utm.easting - 500_000.0).abs() < 0.01);
        assert!(utm.northing.abs() < 0.01);
    }

    #[test]
    fn test_to_metric_southern_hemisphere_uses_false_northing() {
        let utm = to_metric(-23.5505, -46.6333).unwrap();
        assert_eq!(utm.zone_number, 23);
        assert!(utm.northing > 7_000_000.0 && utm.northing < 7_500_000.0);
        assert!(utm.easting > 300_000.0 && utm.easting < 400_000.0);
    }

    #[test]
    fn test_to_metric_rejects_polar() {
        assert!(to_metric(89.0, 0.0).is_err());
    }

    #[test]
    fn test_small_lot_has_no_zone_mismatch() {
        // ~40 m square
        let points = vec![
            (-23.5500, -46.6300),
            (-23.5500, -46.6296),
            (-23.5504, -46.6296),
            (-23.5504, -46.6300),
        ];
        let elevations = vec![Some(760.0), Some(761.0), None, Some(759.5)];
        let result = convert_point_list(&points, &elevations).unwrap();

        assert_eq!(result.zone_mismatches, 0);
        assert_eq!(result.rows.len(), 4);
        assert!(result.rows.iter().all(|r| r.is_some()));
        assert_eq!(result.rows[2].unwrap().elevation, None);

        let a = result.rows[0].unwrap();
        let b = result.rows[1].unwrap();
        let dx = b.easting - a.easting;
        assert!((dx - 40.8).abs() < 1.0, "dx {}", dx);
    }

    #[test]
    fn test_zone_straddle_is_counted() {
        let points = vec![(10.0, 5.9999), (10.0, 6.0001)];
        let result = convert_point_list(&points, &[None, None]).unwrap();
        assert_eq!(result.zone_mismatches, 1);
    }

    #[test]
    fn test_unconvertible_point_yields_empty_row() {
        let points = vec![(-23.55, -46.63), (89.5, 0.0)];
        let result = convert_point_list(&points, &[Some(1.0), Some(2.0)]).unwrap();
        assert!(result.rows[0].is_some());
        assert!(result.rows[1].is_none());
        assert_eq!(result.valid_rows().count(), 1);
    }

    #[test]
    fn test_length_mismatch() {
        let err = convert_point_list(&[(0.0, 0.0)], &[]).unwrap_err();
        assert!(matches!(err, LotError::LengthMismatch(_)));
    }
}
