use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bincode::{Decode, Encode};

use parallax_image::image::{Image, ImageSize};
use parallax_mesh::mesh::TriangleMesh;

use crate::error::IoError;

/// Magic bytes at the start of every packaged asset file.
pub const ASSET_MAGIC: [u8; 4] = *b"PXA1";

/// Format version written right after the magic.
pub const ASSET_VERSION: u32 = 1;

/// A self-contained textured mesh: geometry, texture coordinates and the
/// baked rgb8 atlas packaged into a single binary file.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TexturedAsset {
    /// Vertex positions.
    pub vertices: Vec<[f64; 3]>,
    /// Per-vertex unit normals.
    pub normals: Vec<[f64; 3]>,
    /// Per-vertex texture coordinates in `[0, 1]`.
    pub uvs: Vec<[f64; 2]>,
    /// Triangles as vertex index triples.
    pub triangles: Vec<[u32; 3]>,
    /// Atlas width in pixels.
    pub atlas_width: u32,
    /// Atlas height in pixels.
    pub atlas_height: u32,
    /// Atlas pixel data, rgb8 row major.
    pub atlas_data: Vec<u8>,
}

impl TexturedAsset {
    /// Bundles a mesh and its baked atlas into an asset.
    ///
    /// The mesh must carry per-vertex normals and texture coordinates.
    pub fn from_mesh(mesh: &TriangleMesh, atlas: &Image<u8, 3>) -> Result<Self, IoError> {
        let normals = mesh
            .normals
            .as_ref()
            .ok_or_else(|| IoError::AssetCodecError("mesh has no normals".to_string()))?;
        let uvs = mesh
            .uvs
            .as_ref()
            .ok_or_else(|| IoError::AssetCodecError("mesh has no texture coordinates".to_string()))?;
        if normals.len() != mesh.vertices.len() || uvs.len() != mesh.vertices.len() {
            return Err(IoError::AssetCodecError(
                "mesh attribute counts do not match the vertex count".to_string(),
            ));
        }
        Ok(Self {
            vertices: mesh.vertices.clone(),
            normals: normals.clone(),
            uvs: uvs.clone(),
            triangles: mesh.triangles.clone(),
            atlas_width: atlas.width() as u32,
            atlas_height: atlas.height() as u32,
            atlas_data: atlas.as_slice().to_vec(),
        })
    }

    /// Rebuilds the mesh with its normals and texture coordinates.
    pub fn to_mesh(&self) -> TriangleMesh {
        let mut mesh = TriangleMesh::new(self.vertices.clone(), self.triangles.clone());
        mesh.normals = Some(self.normals.clone());
        mesh.uvs = Some(self.uvs.clone());
        mesh
    }

    /// Rebuilds the atlas image from the embedded pixel data.
    pub fn to_atlas(&self) -> Result<Image<u8, 3>, IoError> {
        let image = Image::new(
            ImageSize {
                width: self.atlas_width as usize,
                height: self.atlas_height as usize,
            },
            self.atlas_data.clone(),
        )?;
        Ok(image)
    }
}

/// Writes the asset to the given file path.
///
/// The file starts with the `PXA1` magic and a little-endian format
/// version, followed by the bincode-encoded payload.
pub fn write_asset(file_path: impl AsRef<Path>, asset: &TexturedAsset) -> Result<(), IoError> {
    let file = File::create(file_path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&ASSET_MAGIC)?;
    writer.write_all(&ASSET_VERSION.to_le_bytes())?;

    let config = bincode::config::standard();
    bincode::encode_into_std_write(asset, &mut writer, config)
        .map_err(|e| IoError::AssetCodecError(e.to_string()))?;

    Ok(())
}

/// Reads an asset back from the given file path and verifies the header.
pub fn read_asset(file_path: impl AsRef<Path>) -> Result<TexturedAsset, IoError> {
    let file = File::open(file_path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != ASSET_MAGIC {
        return Err(IoError::BadAssetMagic {
            found: magic,
            expected: ASSET_MAGIC,
        });
    }

    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    let version = u32::from_le_bytes(version);
    if version != ASSET_VERSION {
        return Err(IoError::AssetCodecError(format!(
            "unsupported asset version {version}"
        )));
    }

    let config = bincode::config::standard();
    let asset = bincode::decode_from_std_read(&mut reader, config)
        .map_err(|e| IoError::AssetCodecError(e.to_string()))?;

    Ok(asset)
}
