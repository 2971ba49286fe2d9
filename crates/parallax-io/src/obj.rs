use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use parallax_mesh::TriangleMesh;

use crate::error::IoError;

const MATERIAL_NAME: &str = "reconstruction";

/// Writes the mesh as a Wavefront OBJ file.
///
/// Emits `v`, `vt` and `vn` records for the attributes the mesh carries
/// and face records with matching 1-based index layout. Floats are
/// written with six fixed decimals so repeated exports are byte-stable.
/// Texture coordinates are flipped to the OBJ bottom-left origin.
pub fn write_obj(file_path: impl AsRef<Path>, mesh: &TriangleMesh) -> Result<(), IoError> {
    let file = File::create(file_path)?;
    let mut writer = BufWriter::new(file);
    write_obj_impl(&mut writer, mesh, None)
}

/// Writes the mesh as a Wavefront OBJ file with a material companion.
///
/// Next to the OBJ, a `.mtl` file with the same stem is created whose
/// single material maps `atlas_file_name` as the diffuse texture. The OBJ
/// references the material through `mtllib`/`usemtl`.
pub fn write_obj_with_material(
    file_path: impl AsRef<Path>,
    mesh: &TriangleMesh,
    atlas_file_name: &str,
) -> Result<(), IoError> {
    let path = file_path.as_ref();
    let mtl_path = path.with_extension("mtl");
    let mtl_name = mtl_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("material.mtl"));

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_obj_impl(&mut writer, mesh, Some(&mtl_name))?;

    let mtl_file = File::create(&mtl_path)?;
    let mut mtl = BufWriter::new(mtl_file);
    writeln!(mtl, "newmtl {MATERIAL_NAME}")?;
    writeln!(mtl, "Ka 1.000000 1.000000 1.000000")?;
    writeln!(mtl, "Kd 1.000000 1.000000 1.000000")?;
    writeln!(mtl, "Ks 0.000000 0.000000 0.000000")?;
    writeln!(mtl, "illum 1")?;
    writeln!(mtl, "map_Kd {atlas_file_name}")?;
    Ok(())
}

fn write_obj_impl(
    writer: &mut impl Write,
    mesh: &TriangleMesh,
    mtl_name: Option<&str>,
) -> Result<(), IoError> {
    if let Some(name) = mtl_name {
        writeln!(writer, "mtllib {name}")?;
    }

    for v in &mesh.vertices {
        writeln!(writer, "v {:.6} {:.6} {:.6}", v[0], v[1], v[2])?;
    }
    if let Some(uvs) = &mesh.uvs {
        for uv in uvs {
            // the atlas stores v = 0 in its first row, OBJ expects bottom-left
            writeln!(writer, "vt {:.6} {:.6}", uv[0], 1.0 - uv[1])?;
        }
    }
    if let Some(normals) = &mesh.normals {
        for n in normals {
            writeln!(writer, "vn {:.6} {:.6} {:.6}", n[0], n[1], n[2])?;
        }
    }

    if mtl_name.is_some() {
        writeln!(writer, "usemtl {MATERIAL_NAME}")?;
    }

    let has_uvs = mesh.uvs.is_some();
    let has_normals = mesh.normals.is_some();
    for tri in &mesh.triangles {
        write!(writer, "f")?;
        for &v in tri {
            let i = v as u64 + 1;
            match (has_uvs, has_normals) {
                (true, true) => write!(writer, " {i}/{i}/{i}")?,
                (true, false) => write!(writer, " {i}/{i}")?,
                (false, true) => write!(writer, " {i}//{i}")?,
                (false, false) => write!(writer, " {i}")?,
            }
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::read_to_string;

    fn textured_quad() -> TriangleMesh {
        let mut mesh = TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        mesh.uvs = Some(vec![[0.25, 0.1], [0.75, 0.1], [0.75, 0.9], [0.25, 0.9]]);
        mesh.normals = Some(vec![[0.0, 0.0, 1.0]; 4]);
        mesh
    }

    #[test]
    fn obj_records_are_formatted_and_one_based() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("quad.obj");
        write_obj(&file_path, &textured_quad())?;

        let text = read_to_string(&file_path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "v 0.000000 0.000000 0.000000");
        assert_eq!(lines.iter().filter(|l| l.starts_with("v ")).count(), 4);
        assert_eq!(lines.iter().filter(|l| l.starts_with("vt ")).count(), 4);
        assert_eq!(lines.iter().filter(|l| l.starts_with("vn ")).count(), 4);
        assert!(text.contains("f 1/1/1 2/2/2 3/3/3"));
        assert!(text.contains("f 1/1/1 3/3/3 4/4/4"));
        Ok(())
    }

    #[test]
    fn texture_coordinates_are_flipped() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("quad.obj");
        write_obj(&file_path, &textured_quad())?;

        let text = read_to_string(&file_path)?;
        assert!(text.contains("vt 0.250000 0.900000"));
        assert!(text.contains("vt 0.750000 0.100000"));
        Ok(())
    }

    #[test]
    fn material_companion_references_the_atlas() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("scan.obj");
        write_obj_with_material(&file_path, &textured_quad(), "atlas.png")?;

        let obj = read_to_string(&file_path)?;
        assert!(obj.starts_with("mtllib scan.mtl"));
        assert!(obj.contains("usemtl reconstruction"));

        let mtl = read_to_string(tmp_dir.path().join("scan.mtl"))?;
        assert!(mtl.contains("newmtl reconstruction"));
        assert!(mtl.contains("map_Kd atlas.png"));
        Ok(())
    }

    #[test]
    fn bare_mesh_uses_plain_face_records() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("bare.obj");
        let mesh = TriangleMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
        );
        write_obj(&file_path, &mesh)?;

        let text = read_to_string(&file_path)?;
        assert!(text.contains("f 1 2 3"));
        assert!(!text.contains("vt"));
        Ok(())
    }
}
