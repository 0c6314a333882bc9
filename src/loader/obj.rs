//! OBJ/MTL format adapter.

use std::path::Path;

use anyhow::Context;
use cgmath::{InnerSpace, Vector3};
use log::{debug, warn};

use crate::error::GeometryError;
use crate::gfx::geometry::{MeshKind, MeshRange, ModelGeometry, MAX_VERTICES};
use crate::gfx::resources::material::Material;
use crate::gfx::resources::texture_resource::TextureImage;

use super::{ModelSource, NodeSource};

/// Loads an OBJ file and its MTL materials into a [`ModelSource`].
///
/// Every tobj model becomes one mesh and one child node under a root
/// named after the file. Missing normals are reconstructed by averaging
/// face normals, and texture paths in the MTL are resolved relative to
/// the OBJ's directory.
pub fn load_obj(path: impl AsRef<Path>) -> anyhow::Result<ModelSource> {
    let path = path.as_ref();
    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("failed to load OBJ file {}", path.display()))?;

    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("model")
        .to_string();
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mtl_materials = materials.unwrap_or_else(|err| {
        warn!("no usable MTL for {}: {}", path.display(), err);
        Vec::new()
    });
    let mut out_materials: Vec<Material> = mtl_materials
        .iter()
        .enumerate()
        .map(|(i, mtl)| convert_material(mtl, i, base_dir))
        .collect();
    // Meshes without a material id share one fallback at the end.
    let fallback_material = out_materials.len();
    let mut fallback_used = false;

    let mut geometry = ModelGeometry::default();
    let mut root = NodeSource::new(&name);
    let any_texcoords = models.iter().any(|m| !m.mesh.texcoords.is_empty());

    for (model_index, model) in models.iter().enumerate() {
        let mesh = &model.mesh;
        let base = geometry.vertex_count();
        let count = mesh.positions.len() / 3;
        if base + count > MAX_VERTICES {
            return Err(GeometryError::TooManyVertices(base + count).into());
        }

        let normals = if mesh.normals.len() == mesh.positions.len() {
            mesh.normals.clone()
        } else {
            debug!("computing normals for `{}`", model.name);
            smooth_normals(&mesh.positions, &mesh.indices)
        };

        for v in 0..count {
            geometry
                .vertices
                .extend_from_slice(&mesh.positions[v * 3..v * 3 + 3]);
            geometry.vertices.extend_from_slice(&normals[v * 3..v * 3 + 3]);
        }
        if any_texcoords {
            if mesh.texcoords.len() == count * 2 {
                for v in 0..count {
                    geometry.uvs.push(mesh.texcoords[v * 2]);
                    // OBJ uses a bottom-left origin, textures a top-left one.
                    geometry.uvs.push(1.0 - mesh.texcoords[v * 2 + 1]);
                }
            } else {
                geometry.uvs.extend(std::iter::repeat(0.0).take(count * 2));
            }
        }

        let index_offset = (geometry.indices.len() * 2) as u64;
        for &index in &mesh.indices {
            geometry.indices.push((base + index as usize) as u16);
        }

        let material_index = match mesh.material_id {
            Some(id) if id < out_materials.len() => id,
            _ => {
                fallback_used = true;
                fallback_material
            }
        };
        let textured = !mesh.texcoords.is_empty()
            && out_materials
                .get(material_index)
                .map(|m| m.diffuse_image.is_some())
                .unwrap_or(false);

        let mesh_index = geometry.meshes.len();
        geometry.meshes.push(MeshRange {
            kind: if textured {
                MeshKind::Textured
            } else {
                MeshKind::Normal
            },
            index_offset,
            index_count: mesh.indices.len() as u32,
        });

        let node_name = if model.name.is_empty() {
            format!("{}_{}", name, model_index)
        } else {
            model.name.clone()
        };
        let mut node = NodeSource::new(&node_name);
        node.meshes.push((mesh_index, material_index));
        root.children.push(node);
    }

    if fallback_used {
        out_materials.push(Material::new("default"));
    }

    Ok(ModelSource {
        name,
        geometry,
        materials: out_materials,
        lights: Vec::new(),
        root,
    })
}

fn convert_material(mtl: &tobj::Material, index: usize, base_dir: &Path) -> Material {
    let name = if mtl.name.is_empty() {
        format!("material_{}", index)
    } else {
        mtl.name.clone()
    };

    let mut material = Material::new(&name).with_phong(
        mtl.ambient.unwrap_or([0.2, 0.2, 0.2]),
        mtl.diffuse.unwrap_or([0.8, 0.8, 0.8]),
        mtl.specular.unwrap_or([0.0, 0.0, 0.0]),
        mtl.shininess.unwrap_or(32.0),
    );
    if let Some(dissolve) = mtl.dissolve {
        material = material.with_opacity(dissolve);
    }
    if let Some(texture) = &mtl.diffuse_texture {
        if let Some(image) = load_texture_image(base_dir, texture) {
            material = material.with_diffuse_image(image);
        }
    }
    if let Some(texture) = &mtl.specular_texture {
        if let Some(image) = load_texture_image(base_dir, texture) {
            material = material.with_specular_image(image);
        }
    }
    material
}

fn load_texture_image(base_dir: &Path, relative: &str) -> Option<TextureImage> {
    let path = base_dir.join(relative);
    match image::open(&path) {
        Ok(image) => {
            let rgba = image.to_rgba8();
            let (width, height) = rgba.dimensions();
            Some(TextureImage::new(width, height, rgba.into_raw()))
        }
        Err(err) => {
            warn!("failed to load texture {}: {}", path.display(), err);
            None
        }
    }
}

/// Per-vertex normals from face normals, area weighted by the cross
/// product and normalized at the end.
fn smooth_normals(positions: &[f32], indices: &[u32]) -> Vec<f32> {
    let mut accum = vec![Vector3::new(0.0f32, 0.0, 0.0); positions.len() / 3];
    for triangle in indices.chunks_exact(3) {
        let p = |i: u32| {
            let i = i as usize * 3;
            Vector3::new(positions[i], positions[i + 1], positions[i + 2])
        };
        let normal = (p(triangle[1]) - p(triangle[0])).cross(p(triangle[2]) - p(triangle[0]));
        for &index in triangle {
            accum[index as usize] += normal;
        }
    }

    let mut normals = Vec::with_capacity(positions.len());
    for n in accum {
        let n = if n.magnitude2() > 0.0 {
            n.normalize()
        } else {
            Vector3::new(0.0, 0.0, 1.0)
        };
        normals.extend_from_slice(&[n.x, n.y, n.z]);
    }
    normals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_averages_adjacent_faces() {
        // Two triangles in the XY plane sharing an edge, both facing +Z.
        let positions = [
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            1.0, 1.0, 0.0,
        ];
        let indices = [0, 1, 2, 2, 1, 3];
        let normals = smooth_normals(&positions, &indices);
        for v in 0..4 {
            assert!((normals[v * 3 + 2] - 1.0).abs() < 1e-6);
            assert!(normals[v * 3].abs() < 1e-6);
            assert!(normals[v * 3 + 1].abs() < 1e-6);
        }
    }

    #[test]
    fn degenerate_faces_fall_back_to_z() {
        let positions = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let indices = [0, 1, 2];
        let normals = smooth_normals(&positions, &indices);
        assert_eq!(&normals[0..3], &[0.0, 0.0, 1.0]);
    }
}
