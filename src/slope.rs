//! Declivity between the street front of a lot and the rest of it

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LotError, LotResult};
use crate::tabular::TabularRow;

/// Runs shorter than this (meters) count as zero
const MIN_RUN: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlopePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub front: bool,
}

impl From<&TabularRow> for SlopePoint {
    fn from(row: &TabularRow) -> Self {
        Self {
            x: row.x,
            y: row.y,
            z: row.z,
            front: row.front,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeClass {
    Flat,
    Moderate,
    Steep,
    VerySteep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeDirection {
    Uphill,
    Downhill,
}

impl fmt::Display for SlopeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlopeClass::Flat => "Flat",
            SlopeClass::Moderate => "Moderate",
            SlopeClass::Steep => "Steep",
            SlopeClass::VerySteep => "Very Steep",
        })
    }
}

impl fmt::Display for SlopeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlopeDirection::Uphill => "Uphill",
            SlopeDirection::Downhill => "Downhill",
        })
    }
}

/// Class by |slope%|: <5 flat, <12 moderate, <20 steep, otherwise very steep.
/// Direction is `None` for flat lots.
pub fn classify(slope_percent: f64) -> (SlopeClass, Option<SlopeDirection>) {
    let magnitude = slope_percent.abs();
    let class = if magnitude < 5.0 {
        SlopeClass::Flat
    } else if magnitude < 12.0 {
        SlopeClass::Moderate
    } else if magnitude < 20.0 {
        SlopeClass::Steep
    } else {
        SlopeClass::VerySteep
    };

    let direction = match class {
        SlopeClass::Flat => None,
        _ if slope_percent > 0.0 => Some(SlopeDirection::Uphill),
        _ => Some(SlopeDirection::Downhill),
    };
    (class, direction)
}

/// Slope result stored on the lot record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declivity {
    /// Rise from the front centroid to the back centroid over the run, in percent
    pub slope_percent: f64,
    pub class: SlopeClass,
    pub direction: Option<SlopeDirection>,
    /// Human readable class, e.g. "Moderate Uphill"
    pub label: String,
    /// Horizontal distance between the two centroids, in meters
    pub run_m: f64,
    pub min_elevation: f64,
    pub max_elevation: f64,
    pub amplitude: f64,
}

fn centroid<'a>(points: impl Iterator<Item = &'a SlopePoint>) -> Option<[f64; 3]> {
    let (sum, n) = points.fold(([0.0; 3], 0usize), |(s, n), p| {
        ([s[0] + p.x, s[1] + p.y, s[2] + p.z], n + 1)
    });
    (n > 0).then(|| sum.map(|v| v / n as f64))
}

/// Declivity from the front points towards the back of the lot
pub fn declivity(points: &[SlopePoint]) -> LotResult<Declivity> {
    if points.is_empty() {
        return Err(LotError::EmptyPointCloud);
    }
    let front = centroid(points.iter().filter(|p| p.front))
        .ok_or(LotError::MissingStageInput("front points"))?;
    let back = centroid(points.iter().filter(|p| !p.front))
        .ok_or(LotError::MissingStageInput("back points"))?;

    let run = (back[0] - front[0]).hypot(back[1] - front[1]);
    let slope_percent = if run < MIN_RUN {
        0.0
    } else {
        (back[2] - front[2]) / run * 100.0
    };

    let (class, direction) = classify(slope_percent);
    let label = match direction {
        Some(d) => format!("{} {}", class, d),
        None => class.to_string(),
    };

    let min_elevation = points.iter().map(|p| p.z).fold(f64::INFINITY, f64::min);
    let max_elevation = points.iter().map(|p| p.z).fold(f64::NEG_INFINITY, f64::max);

    Ok(Declivity {
        slope_percent,
        class,
        direction,
        label,
        run_m: run,
        min_elevation,
        max_elevation,
        amplitude: max_elevation - min_elevation,
    })
}
