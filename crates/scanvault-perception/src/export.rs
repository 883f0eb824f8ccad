//! Point-cloud export.
//!
//! [`PointCloudWriter`] is the boundary towards file formats; [`PlyWriter`]
//! writes the ASCII PLY vertex-list flavour understood by most viewers:
//!
//! ```text
//! ply
//! format ascii 1.0
//! element vertex 2
//! property float x
//! property float y
//! property float z
//! property uchar red
//! property uchar green
//! property uchar blue
//! end_header
//! 100 0 0 253 231 37
//! 0 50 0 42 120 142
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::Result;
use crate::cloud::PointSet;

/// Serialises a colored point set into some point-cloud format.
pub trait PointCloudWriter {
    /// Write `cloud` to `out`.
    fn write(&self, cloud: &PointSet, out: &mut dyn Write) -> Result<()>;

    /// Create (or truncate) `path` and write `cloud` into it.
    fn write_to_path(&self, cloud: &PointSet, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write(cloud, &mut out)?;
        out.flush()?;
        info!(path = %path.display(), points = cloud.len(), "point cloud written");
        Ok(())
    }
}

/// ASCII PLY writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlyWriter;

impl PointCloudWriter for PlyWriter {
    fn write(&self, cloud: &PointSet, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "ply")?;
        writeln!(out, "format ascii 1.0")?;
        writeln!(out, "element vertex {}", cloud.len())?;
        for axis in ["x", "y", "z"] {
            writeln!(out, "property float {axis}")?;
        }
        for channel in ["red", "green", "blue"] {
            writeln!(out, "property uchar {channel}")?;
        }
        writeln!(out, "end_header")?;
        for (p, color) in cloud.iter() {
            let [r, g, b] = color.to_u8();
            writeln!(out, "{} {} {} {r} {g} {b}", p.x, p.y, p.z)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::Rgb;
    use crate::octree::Point3;

    #[test]
    fn ply_header_and_vertices() {
        let mut cloud = PointSet::new();
        cloud.push(Point3::new(100.0, 0.0, 0.0), Rgb::new(1.0, 0.0, 0.0));
        cloud.push(Point3::new(0.0, 50.5, 0.0), Rgb::new(0.0, 0.0, 1.0));

        let mut buf = Vec::new();
        PlyWriter.write(&cloud, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "ply");
        assert_eq!(lines[2], "element vertex 2");
        assert_eq!(lines[9], "end_header");
        assert_eq!(lines[10], "100 0 0 255 0 0");
        assert_eq!(lines[11], "0 50.5 0 0 0 255");
        assert_eq!(lines.len(), 12);
    }

    #[test]
    fn write_to_path_creates_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("scan.ply");
        PlyWriter.write_to_path(&PointSet::new(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("element vertex 0"));
    }
}
