use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use parallax_3d::PointCloud;

use crate::error::IoError;

/// Writes the point cloud as an ascii PLY file.
///
/// Colors and normals are emitted when the cloud carries them. Intended
/// for inspecting intermediate reconstruction stages in standard viewers.
pub fn write_ply(file_path: impl AsRef<Path>, cloud: &PointCloud) -> Result<(), IoError> {
    let file = File::create(file_path)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", cloud.len())?;
    writeln!(writer, "property double x")?;
    writeln!(writer, "property double y")?;
    writeln!(writer, "property double z")?;
    if cloud.colors().is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    if cloud.normals().is_some() {
        writeln!(writer, "property double nx")?;
        writeln!(writer, "property double ny")?;
        writeln!(writer, "property double nz")?;
    }
    writeln!(writer, "end_header")?;

    for (i, p) in cloud.points().iter().enumerate() {
        write!(writer, "{:.6} {:.6} {:.6}", p[0], p[1], p[2])?;
        if let Some(colors) = cloud.colors() {
            let c = colors[i];
            write!(writer, " {} {} {}", c[0], c[1], c[2])?;
        }
        if let Some(normals) = cloud.normals() {
            let n = normals[i];
            write!(writer, " {:.6} {:.6} {:.6}", n[0], n[1], n[2])?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}
