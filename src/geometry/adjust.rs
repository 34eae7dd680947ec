//! Boundary regularisation for detected lot polygons
//!
//! A detected boundary is noisy. We prefer a minimum-area rectangle for
//! near-rectangular lots, accept a free-form simplification only when it is
//! convex and clearly beats the rectangle on area error, and otherwise fall
//! back to the rectangle rescaled to the original area.

use geo::{Centroid, MinimumRotatedRect};
use serde::{Deserialize, Serialize};

use super::area::{planar_area, to_polygon};
use super::simplify::simplify_to_range;
use crate::error::{LotError, LotResult};

/// Tunables for [`select_adjustment`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentParams {
    /// Largest relative area error accepted for the plain rectangle
    pub area_diff_threshold: f64,
    /// Simplification must reach this fraction of the rectangle's error to win
    pub improvement_factor: f64,
    pub min_points: usize,
    pub max_points: usize,
    pub max_iterations: usize,
}

impl Default for AdjustmentParams {
    fn default() -> Self {
        Self {
            area_diff_threshold: 0.18,
            improvement_factor: 0.8,
            min_points: 4,
            max_points: 6,
            max_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentMethod {
    MinRect,
    ApproxPoly,
    AdjustedMinRect,
}

impl AdjustmentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentMethod::MinRect => "min_rect",
            AdjustmentMethod::ApproxPoly => "approx_poly",
            AdjustmentMethod::AdjustedMinRect => "adjusted_min_rect",
        }
    }
}

/// The polygon chosen to replace a raw detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub method: AdjustmentMethod,
    /// Normalized (0..1) image-space vertices, ring left open
    pub points: Vec<(f64, f64)>,
    pub area: f64,
    pub original_area: f64,
    /// |area - original_area| / original_area
    pub area_error: f64,
}

/// Whether the turn direction never changes along the ring
///
/// Collinear vertices are ignored. Rings with fewer than 3 points are not convex.
pub fn is_convex(points: &[(f64, f64)]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }

    let mut sign = 0.0_f64;
    for i in 0..n {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % n];
        let (x2, y2) = points[(i + 2) % n];
        let cross = (x1 - x0) * (y2 - y1) - (y1 - y0) * (x2 - x1);
        if cross.abs() < f64::EPSILON {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }

    sign != 0.0
}

/// Minimum-area rotated rectangle enclosing the polygon, as 4 corners
///
/// Returns `None` when the polygon has no usable outline (zero area).
pub fn min_area_rectangle(points: &[(f64, f64)]) -> Option<Vec<(f64, f64)>> {
    if points.len() < 3 || planar_area(points) <= 0.0 {
        return None;
    }

    let rect = to_polygon(points).minimum_rotated_rect()?;
    let corners: Vec<(f64, f64)> = rect
        .exterior()
        .coords()
        .take(4)
        .map(|c| (c.x, c.y))
        .collect();

    if corners.len() == 4 && planar_area(&corners) > 0.0 {
        Some(corners)
    } else {
        None
    }
}

/// Scale a polygon about its centroid
pub fn scale_about_centroid(points: &[(f64, f64)], factor: f64) -> Vec<(f64, f64)> {
    let Some(center) = to_polygon(points).centroid() else {
        return points.to_vec();
    };
    let (cx, cy) = (center.x(), center.y());

    points
        .iter()
        .map(|&(x, y)| (cx + (x - cx) * factor, cy + (y - cy) * factor))
        .collect()
}

fn relative_error(area: f64, original: f64) -> f64 {
    (area - original).abs() / original
}

/// Pick the replacement polygon for a detected boundary
///
/// # Errors
/// Fails for fewer than 3 points or a zero-area polygon. Returns `Ok(None)`
/// when no rectangle can be fitted, in which case the raw polygon stays.
pub fn select_adjustment(
    original: &[(f64, f64)],
    params: &AdjustmentParams,
) -> LotResult<Option<Adjustment>> {
    if original.len() < 3 {
        return Err(LotError::TooFewPoints(original.len()));
    }
    let original_area = planar_area(original);
    if original_area <= 0.0 {
        return Err(LotError::ZeroArea);
    }

    let Some(rect) = min_area_rectangle(original) else {
        return Ok(None);
    };
    let rect_area = planar_area(&rect);
    let rect_error = relative_error(rect_area, original_area);

    if rect_error <= params.area_diff_threshold {
        return Ok(Some(Adjustment {
            method: AdjustmentMethod::MinRect,
            points: rect,
            area: rect_area,
            original_area,
            area_error: rect_error,
        }));
    }

    let simplified = simplify_to_range(
        original,
        params.min_points,
        params.max_points,
        params.max_iterations,
    );
    let simplified_area = planar_area(&simplified.points);
    let simplified_error = relative_error(simplified_area, original_area);

    if is_convex(&simplified.points) && simplified_error < params.improvement_factor * rect_error {
        return Ok(Some(Adjustment {
            method: AdjustmentMethod::ApproxPoly,
            points: simplified.points,
            area: simplified_area,
            original_area,
            area_error: simplified_error,
        }));
    }

    let scaled = scale_about_centroid(&rect, (original_area / rect_area).sqrt());
    let scaled_area = planar_area(&scaled);
    Ok(Some(Adjustment {
        method: AdjustmentMethod::AdjustedMinRect,
        points: scaled,
        area: scaled_area,
        original_area,
        area_error: relative_error(scaled_area, original_area),
    }))
}
