/// A colored triangle for STL output
#[derive(Debug, Clone)]
pub struct Triangle {
    /// Three vertices: [[x, y, z], [x, y, z], [x, y, z]]
    pub vertices: [[f32; 3]; 3],
    /// Normal vector [nx, ny, nz]
    pub normal: [f32; 3],
    pub color: [u8; 3],
}

impl Triangle {
    /// Create a new triangle and calculate its normal
    pub fn new(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3], color: [u8; 3]) -> Self {
        Self {
            vertices: [v0, v1, v2],
            normal: calculate_normal(&[v0, v1, v2]),
            color,
        }
    }
}

/// Unit normal by the right-hand rule; degenerate triangles get +Z
pub(crate) fn calculate_normal(vertices: &[[f32; 3]; 3]) -> [f32; 3] {
    let [v0, v1, v2] = *vertices;
    let u = [v1[0] - v0[0], v1[1] - v0[1], v1[2] - v0[2]];
    let v = [v2[0] - v0[0], v2[1] - v0[1], v2[2] - v0[2]];

    let nx = u[1] * v[2] - u[2] * v[1];
    let ny = u[2] * v[0] - u[0] * v[2];
    let nz = u[0] * v[1] - u[1] * v[0];

    let len = (nx * nx + ny * ny + nz * nz).sqrt();
    if len > 1e-10 {
        [nx / len, ny / len, nz / len]
    } else {
        [0.0, 0.0, 1.0]
    }
}

/// Scale a color by `factor` (0..1)
pub fn shade(color: [u8; 3], factor: f64) -> [u8; 3] {
    let f = factor.clamp(0.0, 1.0);
    color.map(|c| (c as f64 * f).round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_normal() {
        let tri = Triangle::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0, 0, 0]);

        assert!((tri.normal[0]).abs() < 0.001);
        assert!((tri.normal[1]).abs() < 0.001);
        assert!((tri.normal[2] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_reversed_winding_points_down() {
        let tri = Triangle::new([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0, 0, 0]);
        assert!((tri.normal[2] + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_shade() {
        assert_eq!(shade([200, 100, 10], 0.3), [60, 30, 3]);
        assert_eq!(shade([200, 100, 10], 1.0), [200, 100, 10]);
        assert_eq!(shade([200, 100, 10], 1.5), [200, 100, 10]);
    }
}
