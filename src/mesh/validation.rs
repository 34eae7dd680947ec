//! Pre-export mesh checks
//!
//! Drops triangles with non-finite coordinates or (near) zero area, recomputes
//! normals, and checks that the terrain solid is closed.

use std::collections::HashMap;

use super::builder::{Triangle, calculate_normal};
use super::extrusion::VolumetricMesh;

/// Below this area (m²) a triangle is considered degenerate
const MIN_TRIANGLE_AREA: f32 = 1e-8;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ValidationReport {
    pub total: usize,
    pub degenerate: usize,
    pub invalid_coords: usize,
    /// Edges not shared by exactly two faces
    pub open_edges: usize,
}

impl ValidationReport {
    pub fn has_issues(&self) -> bool {
        self.degenerate > 0 || self.invalid_coords > 0 || self.open_edges > 0
    }

    pub fn summary(&self) -> String {
        if !self.has_issues() {
            format!("Mesh valid: {} triangles, closed", self.total)
        } else {
            format!(
                "Mesh issues: {} total, {} degenerate, {} invalid coords, {} open edges",
                self.total, self.degenerate, self.invalid_coords, self.open_edges
            )
        }
    }
}

fn has_invalid_coords(tri: &Triangle) -> bool {
    tri.vertices.iter().flatten().any(|c| !c.is_finite())
}

fn triangle_area(vertices: &[[f32; 3]; 3]) -> f32 {
    let [v0, v1, v2] = *vertices;
    let a = [v1[0] - v0[0], v1[1] - v0[1], v1[2] - v0[2]];
    let b = [v2[0] - v0[0], v2[1] - v0[1], v2[2] - v0[2]];

    let cx = a[1] * b[2] - a[2] * b[1];
    let cy = a[2] * b[0] - a[0] * b[2];
    let cz = a[0] * b[1] - a[1] * b[0];

    0.5 * (cx * cx + cy * cy + cz * cz).sqrt()
}

/// Count edges of the indexed mesh that are not used by exactly two faces
pub fn open_edge_count(mesh: &VolumetricMesh) -> usize {
    let mut uses: HashMap<(usize, usize), usize> = HashMap::new();
    for f in &mesh.faces {
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            *uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }
    uses.values().filter(|&&n| n != 2).count()
}

/// Triangulate the mesh for export, dropping broken faces and fixing normals
pub fn validate_and_fix(mesh: &VolumetricMesh) -> (Vec<Triangle>, ValidationReport) {
    let triangles = mesh.to_triangles();
    let mut report = ValidationReport {
        total: triangles.len(),
        open_edges: open_edge_count(mesh),
        ..Default::default()
    };

    let cleaned: Vec<Triangle> = triangles
        .into_iter()
        .filter_map(|mut tri| {
            if has_invalid_coords(&tri) {
                report.invalid_coords += 1;
                return None;
            }
            if triangle_area(&tri.vertices) < MIN_TRIANGLE_AREA {
                report.degenerate += 1;
                return None;
            }
            tri.normal = calculate_normal(&tri.vertices);
            Some(tri)
        })
        .collect();

    if report.has_issues() {
        tracing::warn!(summary = %report.summary(), "Mesh validation");
    } else {
        tracing::debug!(summary = %report.summary(), "Mesh validation");
    }

    (cleaned, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::extrusion::{FaceKind, TerrainParams, build_volumetric_mesh};

    fn square_mesh(base_depth: f64) -> VolumetricMesh {
        let points = vec![
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 1.0],
            [10.0, 10.0, 2.0],
            [0.0, 10.0, 1.0],
        ];
        let params = TerrainParams {
            base_depth,
            ..Default::default()
        };
        build_volumetric_mesh(&points, &[[10, 20, 30]; 4], &params).unwrap()
    }

    #[test]
    fn test_terrain_solid_is_closed() {
        let mesh = square_mesh(20.0);
        let (tris, report) = validate_and_fix(&mesh);
        assert_eq!(report.open_edges, 0);
        assert!(!report.has_issues(), "{}", report.summary());
        assert_eq!(tris.len(), mesh.faces.len());
    }

    #[test]
    fn test_nan_vertex_is_dropped() {
        let mut mesh = square_mesh(20.0);
        mesh.vertices[0][2] = f64::NAN;
        let (tris, report) = validate_and_fix(&mesh);
        assert!(report.invalid_coords > 0);
        assert_eq!(tris.len(), mesh.faces.len() - report.invalid_coords);
    }

    #[test]
    fn test_degenerate_wall_is_dropped() {
        // Flat cloud with zero base depth: every wall collapses onto the lowest point's level
        let points = vec![
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [10.0, 10.0, 0.0],
            [0.0, 10.0, 0.0],
        ];
        let params = TerrainParams {
            base_depth: 0.0,
            ..Default::default()
        };
        let mesh = build_volumetric_mesh(&points, &[[0, 0, 0]; 4], &params).unwrap();
        let (tris, report) = validate_and_fix(&mesh);
        assert_eq!(report.degenerate, mesh.face_count(FaceKind::Side));
        assert_eq!(tris.len(), 4);
    }

    #[test]
    fn test_triangle_area() {
        let vertices = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert!((triangle_area(&vertices) - 0.5).abs() < 0.001);
    }
}
