use super::Triangle;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Pack a color into the STL attribute word (VisCAM/SolidView convention)
///
/// Bits 0-4 blue, 5-9 green, 10-14 red, bit 15 set when the color is valid.
pub fn pack_rgb555(color: [u8; 3]) -> u16 {
    let [r, g, b] = color.map(|c| (c >> 3) as u16);
    0x8000 | (r << 10) | (g << 5) | b
}

/// Write triangles to a binary STL file with per-face colors
///
/// Binary STL format:
/// - 80 byte header
/// - 4 byte u32 triangle count (little endian)
/// - For each triangle:
///   - 3 x f32 normal (12 bytes)
///   - 3 x 3 x f32 vertices (36 bytes)
///   - 2 byte attribute holding the packed color
pub fn write_stl(path: &Path, triangles: &[Triangle]) -> Result<u64> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create STL file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut header = [b' '; 80];
    let title = b"lot3d terrain COLOR";
    header[..title.len()].copy_from_slice(title);
    writer.write_all(&header)?;

    let count = triangles.len() as u32;
    writer.write_all(&count.to_le_bytes())?;

    for tri in triangles {
        for &n in &tri.normal {
            writer.write_all(&n.to_le_bytes())?;
        }
        for vertex in &tri.vertices {
            for &coord in vertex {
                writer.write_all(&coord.to_le_bytes())?;
            }
        }
        writer.write_all(&pack_rgb555(tri.color).to_le_bytes())?;
    }

    writer.flush()?;

    Ok(estimate_stl_size(triangles.len()) as u64)
}

/// Get the file size of an STL with the given number of triangles
pub fn estimate_stl_size(triangle_count: usize) -> usize {
    // 80 (header) + 4 (count) + triangles * (12 normal + 36 vertices + 2 attribute)
    80 + 4 + triangle_count * 50
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_write_stl_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.stl");

        let triangles = vec![
            Triangle::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [255, 0, 0]),
            Triangle::new([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0, 255, 0]),
        ];

        let written = write_stl(&path, &triangles).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), written);
        assert_eq!(written, estimate_stl_size(2) as u64);

        let mut file = fs::File::open(&path).unwrap();
        let mesh = stl_io::read_stl(&mut file).unwrap();
        assert_eq!(mesh.faces.len(), 2);
        assert_eq!(mesh.vertices.len(), 4);
    }

    #[test]
    fn test_pack_rgb555() {
        assert_eq!(pack_rgb555([0, 0, 0]), 0x8000);
        assert_eq!(pack_rgb555([255, 255, 255]), 0xFFFF);
        assert_eq!(pack_rgb555([255, 0, 0]), 0x8000 | (31 << 10));
        assert_eq!(pack_rgb555([0, 0, 8]), 0x8001);
    }

    #[test]
    fn test_estimate_size() {
        assert_eq!(estimate_stl_size(0), 84);
        assert_eq!(estimate_stl_size(1), 134);
    }
}
