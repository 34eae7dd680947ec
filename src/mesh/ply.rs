use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::extrusion::VolumetricMesh;

/// Write the mesh as ASCII PLY with per-vertex colors
///
/// Corners are written unshared so each face keeps its own shading.
pub fn write_ply(path: &Path, mesh: &VolumetricMesh) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create PLY file: {}", path.display()))?;
    let mut w = BufWriter::new(file);

    writeln!(w, "ply")?;
    writeln!(w, "format ascii 1.0")?;
    writeln!(w, "comment lot3d terrain")?;
    writeln!(w, "element vertex {}", mesh.faces.len() * 3)?;
    writeln!(w, "property float x")?;
    writeln!(w, "property float y")?;
    writeln!(w, "property float z")?;
    writeln!(w, "property uchar red")?;
    writeln!(w, "property uchar green")?;
    writeln!(w, "property uchar blue")?;
    writeln!(w, "element face {}", mesh.faces.len())?;
    writeln!(w, "property list uchar int vertex_indices")?;
    writeln!(w, "end_header")?;

    for (i, face) in mesh.faces.iter().enumerate() {
        let colors = mesh.corner_colors(i);
        for (corner, &v) in face.iter().enumerate() {
            let [x, y, z] = mesh.vertices[v];
            let [r, g, b] = colors[corner];
            writeln!(w, "{:.4} {:.4} {:.4} {} {} {}", x, y, z, r, g, b)?;
        }
    }
    for i in 0..mesh.faces.len() {
        writeln!(w, "3 {} {} {}", i * 3, i * 3 + 1, i * 3 + 2)?;
    }

    w.flush()?;
    Ok(())
}
