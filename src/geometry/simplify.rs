use geo::{Polygon, Simplify};

use super::area::to_polygon;

/// Smallest and largest simplification tolerance tried, as a fraction of the perimeter
const MIN_TOLERANCE: f64 = 1e-4;
const MAX_TOLERANCE: f64 = 0.1;

/// Douglas-Peucker simplification of a closed ring
///
/// Returns the ring's unique vertices (no repeated closing point). Rings
/// with fewer than 4 vertices are returned unchanged.
pub fn simplify_ring(points: &[(f64, f64)], epsilon: f64) -> Vec<(f64, f64)> {
    let ring = open_ring(points);
    if ring.len() < 4 {
        return ring;
    }

    let polygon: Polygon<f64> = to_polygon(&ring);
    let simplified = polygon.simplify(&epsilon);

    let mut out: Vec<(f64, f64)> = simplified.exterior().coords().map(|c| (c.x, c.y)).collect();
    out.pop();

    if out.len() < 3 {
        return ring;
    }

    out
}

/// Outcome of a point-count constrained simplification
#[derive(Debug, Clone, PartialEq)]
pub struct Simplified {
    pub points: Vec<(f64, f64)>,
    /// Tolerance that produced `points`, as a fraction of the perimeter
    pub tolerance: f64,
    /// Whether the point count landed inside the requested range
    pub exact: bool,
}

/// Simplify a ring until its vertex count falls in `[min_points, max_points]`
///
/// Binary-searches the Douglas-Peucker tolerance (relative to the ring
/// perimeter) for at most `max_iterations` steps. If no tolerance lands in
/// range, the attempt whose count is closest to the middle of the range wins.
pub fn simplify_to_range(
    points: &[(f64, f64)],
    min_points: usize,
    max_points: usize,
    max_iterations: usize,
) -> Simplified {
    let ring = open_ring(points);
    let perimeter = perimeter(&ring);
    let target = (min_points + max_points) as f64 / 2.0;

    let mut best = Simplified {
        points: ring.clone(),
        tolerance: 0.0,
        exact: (min_points..=max_points).contains(&ring.len()),
    };
    if best.exact || perimeter == 0.0 {
        return best;
    }

    let mut lo = MIN_TOLERANCE;
    let mut hi = MAX_TOLERANCE;

    for _ in 0..max_iterations {
        let tolerance = (lo + hi) / 2.0;
        let candidate = simplify_ring(&ring, tolerance * perimeter);
        let count = candidate.len();

        if (min_points..=max_points).contains(&count) {
            return Simplified {
                points: candidate,
                tolerance,
                exact: true,
            };
        }

        if (count as f64 - target).abs() < (best.points.len() as f64 - target).abs() {
            best = Simplified {
                points: candidate,
                tolerance,
                exact: false,
            };
        }

        if count > max_points {
            lo = tolerance;
        } else {
            hi = tolerance;
        }
    }

    best
}

/// Drop a repeated closing point if present
fn open_ring(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut ring = points.to_vec();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

fn perimeter(ring: &[(f64, f64)]) -> f64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x1, y1) = ring[i];
            let (x2, y2) = ring[(i + 1) % n];
            ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy_circle(n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| {
                let a = i as f64 / n as f64 * std::f64::consts::TAU;
                let r = 0.3 + if i % 2 == 0 { 0.002 } else { -0.002 };
                (0.5 + r * a.cos(), 0.5 + r * a.sin())
            })
            .collect()
    }

    #[test]
    fn test_simplify_ring_short() {
        let tri = vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];
        assert_eq!(simplify_ring(&tri, 1.0), tri);
    }

    #[test]
    fn test_simplify_ring_drops_collinear() {
        let square = vec![
            (0.0, 0.0),
            (0.5, 0.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (0.0, 0.0),
        ];
        let result = simplify_ring(&square, 0.01);
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_simplify_to_range_lands_in_range() {
        let circle = noisy_circle(64);
        let result = simplify_to_range(&circle, 4, 6, 10);
        assert!(result.exact, "got {} points", result.points.len());
        assert!((4..=6).contains(&result.points.len()));
    }

    #[test]
    fn test_simplify_to_range_already_in_range() {
        let pentagon = noisy_circle(5);
        let result = simplify_to_range(&pentagon, 4, 6, 10);
        assert!(result.exact);
        assert_eq!(result.points.len(), 5);
        assert_eq!(result.tolerance, 0.0);
    }

    #[test]
    fn test_simplify_to_range_no_iterations_keeps_original() {
        let circle = noisy_circle(40);
        let result = simplify_to_range(&circle, 4, 6, 0);
        assert!(!result.exact);
        assert_eq!(result.points.len(), 40);
    }
}
