use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::builder::{Triangle, shade};
use super::triangulation::delaunay;
use crate::error::{LotError, LotResult};

fn default_base_depth() -> f64 {
    20.0
}

fn default_bottom_shade() -> f64 {
    0.3
}

fn default_side_shade() -> f64 {
    0.7
}

fn default_min_output_bytes() -> u64 {
    1024
}

/// Terrain synthesis parameters (`[terrain]` in the config file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    /// Depth of the base below the lowest point, in meters
    #[serde(default = "default_base_depth")]
    pub base_depth: f64,
    /// Color factor for bottom faces
    #[serde(default = "default_bottom_shade")]
    pub bottom_shade: f64,
    /// Color factor for side walls
    #[serde(default = "default_side_shade")]
    pub side_shade: f64,
    /// Exported files smaller than this are treated as failed exports
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            base_depth: default_base_depth(),
            bottom_shade: default_bottom_shade(),
            side_shade: default_side_shade(),
            min_output_bytes: default_min_output_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceKind {
    Top,
    Bottom,
    Side,
}

/// Closed terrain solid
///
/// Vertices `0..n` are the top surface in input order, `n..2n` the matching bottom vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumetricMesh {
    pub vertices: Vec<[f64; 3]>,
    /// Sampled color of each vertex; bottom vertices repeat their top vertex color
    pub colors: Vec<[u8; 3]>,
    pub faces: Vec<[usize; 3]>,
    pub kinds: Vec<FaceKind>,
    pub bottom_shade: f64,
    pub side_shade: f64,
}

impl VolumetricMesh {
    pub fn top_vertex_count(&self) -> usize {
        self.vertices.len() / 2
    }

    pub fn face_count(&self, kind: FaceKind) -> usize {
        self.kinds.iter().filter(|&&k| k == kind).count()
    }

    /// Each side-wall quad is stored as two triangles
    pub fn side_quad_count(&self) -> usize {
        self.face_count(FaceKind::Side) / 2
    }

    pub fn bottom_vertices(&self) -> &[[f64; 3]] {
        &self.vertices[self.top_vertex_count()..]
    }

    fn shade_for(&self, kind: FaceKind) -> f64 {
        match kind {
            FaceKind::Top => 1.0,
            FaceKind::Bottom => self.bottom_shade,
            FaceKind::Side => self.side_shade,
        }
    }

    /// Shaded color at each corner of face `i`
    pub fn corner_colors(&self, i: usize) -> [[u8; 3]; 3] {
        let factor = self.shade_for(self.kinds[i]);
        self.faces[i].map(|v| shade(self.colors[v], factor))
    }

    /// Mean shaded color of face `i`
    pub fn face_color(&self, i: usize) -> [u8; 3] {
        let corners = self.corner_colors(i);
        let mut out = [0u8; 3];
        for (c, slot) in out.iter_mut().enumerate() {
            let sum: u32 = corners.iter().map(|col| col[c] as u32).sum();
            *slot = ((sum as f64) / 3.0).round() as u8;
        }
        out
    }

    /// Flatten to colored f32 triangles
    pub fn to_triangles(&self) -> Vec<Triangle> {
        self.faces
            .iter()
            .enumerate()
            .map(|(i, face)| {
                let [a, b, c] = face.map(|v| self.vertices[v].map(|x| x as f32));
                Triangle::new(a, b, c, self.face_color(i))
            })
            .collect()
    }
}

/// Edges used by exactly one face, oriented as in that face
pub fn boundary_edges(faces: &[[usize; 3]]) -> Vec<(usize, usize)> {
    let mut uses: HashMap<(usize, usize), usize> = HashMap::new();
    for f in faces {
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            *uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }

    faces
        .iter()
        .flat_map(|f| (0..3).map(move |k| (f[k], f[(k + 1) % 3])))
        .filter(|&(a, b)| uses[&(a.min(b), a.max(b))] == 1)
        .collect()
}

/// Build a closed, colored terrain solid from a point cloud
///
/// The top surface is the Delaunay triangulation of the (x, y) projection. Every
/// bottom vertex sits at `z - (base_depth + (z - min_z))`, which puts the whole base
/// on one level `base_depth` below the lowest point. Bottom faces mirror the top
/// with reversed winding and each boundary edge gets a two-triangle wall.
pub fn build_volumetric_mesh(
    points: &[[f64; 3]],
    colors: &[[u8; 3]],
    params: &TerrainParams,
) -> LotResult<VolumetricMesh> {
    if points.is_empty() {
        return Err(LotError::EmptyPointCloud);
    }
    if points.len() != colors.len() {
        return Err(LotError::LengthMismatch(format!(
            "{} points, {} colors",
            points.len(),
            colors.len()
        )));
    }
    if points.len() < 3 {
        return Err(LotError::TooFewPoints(points.len()));
    }

    let xy: Vec<(f64, f64)> = points.iter().map(|p| (p[0], p[1])).collect();
    let top = delaunay(&xy);
    if top.is_empty() {
        return Err(LotError::ZeroArea);
    }

    let n = points.len();
    let min_z = points.iter().map(|p| p[2]).fold(f64::INFINITY, f64::min);

    let mut vertices = points.to_vec();
    vertices.extend(
        points
            .iter()
            .map(|&[x, y, z]| [x, y, z - (params.base_depth + (z - min_z))]),
    );

    let mut all_colors = colors.to_vec();
    all_colors.extend_from_slice(colors);

    let mut faces = Vec::with_capacity(top.len() * 2);
    let mut kinds = Vec::with_capacity(top.len() * 2);

    for &[a, b, c] in &top {
        faces.push([a, b, c]);
        kinds.push(FaceKind::Top);
    }
    for &[a, b, c] in &top {
        faces.push([a + n, c + n, b + n]);
        kinds.push(FaceKind::Bottom);
    }
    // Top faces are CCW, so the outside of edge a->b is on its right
    for (a, b) in boundary_edges(&top) {
        faces.push([a, a + n, b]);
        faces.push([b, a + n, b + n]);
        kinds.push(FaceKind::Side);
        kinds.push(FaceKind::Side);
    }

    Ok(VolumetricMesh {
        vertices,
        colors: all_colors,
        faces,
        kinds,
        bottom_shade: params.bottom_shade,
        side_shade: params.side_shade,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_square() -> Vec<[f64; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [10.0, 10.0, 0.0],
            [0.0, 10.0, 0.0],
        ]
    }

    #[test]
    fn test_flat_square_base_and_walls() {
        let mesh =
            build_volumetric_mesh(&flat_square(), &[[100, 150, 200]; 4], &TerrainParams::default())
                .unwrap();

        assert!(mesh.bottom_vertices().iter().all(|v| v[2] == -20.0));
        assert_eq!(mesh.face_count(FaceKind::Top), 2);
        assert_eq!(mesh.face_count(FaceKind::Bottom), 2);

        let top: Vec<[usize; 3]> = mesh
            .faces
            .iter()
            .zip(&mesh.kinds)
            .filter(|(_, k)| **k == FaceKind::Top)
            .map(|(f, _)| *f)
            .collect();
        assert_eq!(boundary_edges(&top).len(), 4);
        assert_eq!(mesh.side_quad_count(), 4);
    }

    #[test]
    fn test_base_is_level_below_lowest_point() {
        let points = vec![
            [0.0, 0.0, 3.0],
            [10.0, 0.0, 5.0],
            [10.0, 10.0, 8.0],
            [0.0, 10.0, 4.0],
            [5.0, 5.0, 6.0],
        ];
        let params = TerrainParams {
            base_depth: 2.0,
            ..Default::default()
        };
        let mesh = build_volumetric_mesh(&points, &[[0, 0, 0]; 5], &params).unwrap();
        assert!(mesh.bottom_vertices().iter().all(|v| (v[2] - 1.0).abs() < 1e-12));
        assert_eq!(mesh.face_count(FaceKind::Top), 4);
        assert_eq!(mesh.side_quad_count(), 4);
    }

    #[test]
    fn test_normals_point_outward() {
        let mesh =
            build_volumetric_mesh(&flat_square(), &[[0, 0, 0]; 4], &TerrainParams::default())
                .unwrap();
        let center = [5.0f32, 5.0, -10.0];

        for (tri, kind) in mesh.to_triangles().iter().zip(&mesh.kinds) {
            let c: [f32; 3] = [0, 1, 2].map(|k| {
                (tri.vertices[0][k] + tri.vertices[1][k] + tri.vertices[2][k]) / 3.0
            });
            let out = [c[0] - center[0], c[1] - center[1], c[2] - center[2]];
            let dot = out[0] * tri.normal[0] + out[1] * tri.normal[1] + out[2] * tri.normal[2];
            assert!(dot > 0.0, "{:?} face points inward", kind);
        }
    }

    #[test]
    fn test_face_shading() {
        let mesh =
            build_volumetric_mesh(&flat_square(), &[[100, 200, 50]; 4], &TerrainParams::default())
                .unwrap();
        for (i, kind) in mesh.kinds.iter().enumerate() {
            let expected = match kind {
                FaceKind::Top => [100, 200, 50],
                FaceKind::Bottom => [30, 60, 15],
                FaceKind::Side => [70, 140, 35],
            };
            assert_eq!(mesh.face_color(i), expected);
        }
    }

    #[test]
    fn test_invalid_inputs() {
        let p = TerrainParams::default();
        assert_eq!(build_volumetric_mesh(&[], &[], &p), Err(LotError::EmptyPointCloud));
        assert!(matches!(
            build_volumetric_mesh(&flat_square(), &[[0, 0, 0]; 3], &p),
            Err(LotError::LengthMismatch(_))
        ));
        assert_eq!(
            build_volumetric_mesh(&flat_square()[..2], &[[0, 0, 0]; 2], &p),
            Err(LotError::TooFewPoints(2))
        );
        let line = [[0.0, 0.0, 0.0], [1.0, 1.0, 0.0], [2.0, 2.0, 0.0]];
        assert_eq!(
            build_volumetric_mesh(&line, &[[0, 0, 0]; 3], &p),
            Err(LotError::ZeroArea)
        );
    }
}
