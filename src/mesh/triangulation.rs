//! 2D Delaunay triangulation of terrain points
//!
//! The triangulation itself is done by `geo`'s spade backend; this module only
//! cleans the input and maps the resulting triangles back to point indices.

use geo::{Coord, LineString, TriangulateSpade};
use std::collections::HashMap;

/// Points closer than this are treated as duplicates and left out
const DUPLICATE_EPS: f64 = 1e-9;

/// Bit pattern of a coordinate with -0.0 folded into 0.0
fn key(x: f64, y: f64) -> (u64, u64) {
    ((x + 0.0).to_bits(), (y + 0.0).to_bits())
}

fn orient(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// Delaunay triangulation of `points`, as counter-clockwise index triples
///
/// Duplicates keep their first index. Returns an empty list when fewer than
/// three distinct, non-collinear points are given or any coordinate is not finite.
pub fn delaunay(points: &[(f64, f64)]) -> Vec<[usize; 3]> {
    if points.len() < 3 || points.iter().any(|p| !p.0.is_finite() || !p.1.is_finite()) {
        return Vec::new();
    }

    let mut kept: Vec<usize> = Vec::with_capacity(points.len());
    for (i, &p) in points.iter().enumerate() {
        let duplicate = kept.iter().any(|&j| {
            (points[j].0 - p.0).abs() < DUPLICATE_EPS && (points[j].1 - p.1).abs() < DUPLICATE_EPS
        });
        if !duplicate {
            kept.push(i);
        }
    }
    if kept.len() < 3 {
        return Vec::new();
    }

    let index: HashMap<(u64, u64), usize> = kept
        .iter()
        .map(|&i| (key(points[i].0, points[i].1), i))
        .collect();
    let cloud: LineString<f64> = kept
        .iter()
        .map(|&i| Coord {
            x: points[i].0,
            y: points[i].1,
        })
        .collect();

    let triangles = match cloud.unconstrained_triangulation() {
        Ok(triangles) => triangles,
        Err(e) => {
            tracing::warn!(error = %e, points = kept.len(), "Triangulation failed");
            return Vec::new();
        }
    };

    triangles
        .iter()
        .filter_map(|tri| {
            let [a, b, c] = tri.to_array().map(|v| index.get(&key(v.x, v.y)).copied());
            let (a, b, c) = (a?, b?, c?);
            let area = orient(points[a], points[b], points[c]);
            if area > 0.0 {
                Some([a, b, c])
            } else if area < 0.0 {
                Some([a, c, b])
            } else {
                None
            }
        })
        .collect()
}
