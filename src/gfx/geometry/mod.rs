//! CPU-side model geometry and the shared-buffer merge.
//!
//! All models in a scene share one vertex buffer and one index buffer.
//! The vertex buffer holds interleaved position + normal data for every
//! vertex, followed by a trailing UV region (one pair per vertex, zero for
//! untextured meshes) so the UV of global vertex `i` is always addressable
//! at `uv_region_offset + i * 8`. Indices are 16 bit, which caps a merged
//! scene at 65535 vertices.

use crate::error::GeometryError;

/// Floats per interleaved vertex (position + normal).
pub const FLOATS_PER_VERTEX: usize = 6;

/// Byte stride of the interleaved vertex region.
pub const VERTEX_STRIDE: usize = FLOATS_PER_VERTEX * 4;

/// Byte stride of the trailing UV region.
pub const UV_STRIDE: usize = 8;

/// Largest vertex count addressable with 16-bit indices.
pub const MAX_VERTICES: usize = u16::MAX as usize;

/// Distinguishes meshes that carry texture coordinates from those that
/// only shade with material colors.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MeshKind {
    Normal,
    Textured,
}

/// One drawable span of the shared index buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshRange {
    pub kind: MeshKind,
    /// Byte offset into the shared index buffer.
    pub index_offset: u64,
    pub index_count: u32,
}

impl MeshRange {
    /// Element range for `draw_indexed`.
    pub fn element_range(&self) -> std::ops::Range<u32> {
        let first = (self.index_offset / 2) as u32;
        first..first + self.index_count
    }
}

/// Geometry of a single loaded model before it is merged into the scene.
///
/// `vertices` is interleaved position + normal, six floats per vertex.
/// `uvs` is either empty or exactly two floats per vertex. Mesh ranges
/// address this model's own index array.
#[derive(Clone, Debug, Default)]
pub struct ModelGeometry {
    pub vertices: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u16>,
    pub meshes: Vec<MeshRange>,
}

impl ModelGeometry {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / FLOATS_PER_VERTEX
    }

    /// Rejects malformed model data before it can reach the GPU.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let nfloats = self.vertices.len();
        if nfloats == 0 || nfloats % FLOATS_PER_VERTEX != 0 {
            return Err(GeometryError::MalformedVertices(nfloats));
        }
        let nv = self.vertex_count();
        if nv < 3 {
            return Err(GeometryError::MalformedVertices(nfloats));
        }

        if self.indices.is_empty() || self.indices.len() % 3 != 0 {
            return Err(GeometryError::MalformedIndices(self.indices.len()));
        }

        if !self.uvs.is_empty() && self.uvs.len() != nv * 2 {
            return Err(GeometryError::MalformedUvs {
                got: self.uvs.len(),
                expected: nv * 2,
            });
        }

        for tri in (0..self.indices.len()).step_by(3) {
            let (a, b, c) = (
                self.indices[tri],
                self.indices[tri + 1],
                self.indices[tri + 2],
            );
            for &index in &[a, b, c] {
                if index as usize >= nv {
                    return Err(GeometryError::IndexOutOfRange {
                        index,
                        vertex_count: nv,
                    });
                }
            }
            if a == b || b == c || a == c {
                return Err(GeometryError::DegenerateTriangle(tri));
            }
        }

        let index_bytes = (self.indices.len() * 2) as u64;
        for (i, mesh) in self.meshes.iter().enumerate() {
            let end = mesh.index_offset + mesh.index_count as u64 * 2;
            if mesh.index_count % 3 != 0 || end > index_bytes {
                return Err(GeometryError::MalformedMeshRange(i));
            }
        }

        Ok(())
    }
}

/// Accumulates validated models into the shared vertex and index arrays.
#[derive(Debug, Default)]
pub struct MergedGeometry {
    pub vertices: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u16>,
}

impl MergedGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / FLOATS_PER_VERTEX
    }

    /// Byte offset of the UV region within the final vertex buffer.
    pub fn uv_region_offset(&self) -> u64 {
        (self.vertex_count() * VERTEX_STRIDE) as u64
    }

    /// Appends a model, rebasing its indices past the vertices already
    /// merged. Returns the model's mesh ranges rebased into the shared
    /// index buffer. Fails without mutating anything when the combined
    /// vertex count would no longer fit 16-bit indices.
    pub fn merge(&mut self, model: &ModelGeometry) -> Result<Vec<MeshRange>, GeometryError> {
        let base = self.vertex_count();
        let total = base + model.vertex_count();
        if total > MAX_VERTICES {
            return Err(GeometryError::TooManyVertices(total));
        }

        let index_base_bytes = (self.indices.len() * 2) as u64;

        self.vertices.extend_from_slice(&model.vertices);
        if model.uvs.is_empty() {
            self.uvs
                .extend(std::iter::repeat(0.0).take(model.vertex_count() * 2));
        } else {
            self.uvs.extend_from_slice(&model.uvs);
        }
        self.indices
            .extend(model.indices.iter().map(|&i| i + base as u16));

        Ok(model
            .meshes
            .iter()
            .map(|mesh| MeshRange {
                kind: mesh.kind,
                index_offset: mesh.index_offset + index_base_bytes,
                index_count: mesh.index_count,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(offset: f32) -> ModelGeometry {
        let mut vertices = Vec::new();
        for corner in 0..3 {
            vertices.extend_from_slice(&[offset + corner as f32, 0.0, 0.0, 0.0, 0.0, 1.0]);
        }
        ModelGeometry {
            vertices,
            uvs: Vec::new(),
            indices: vec![0, 1, 2],
            meshes: vec![MeshRange {
                kind: MeshKind::Normal,
                index_offset: 0,
                index_count: 3,
            }],
        }
    }

    fn flat_vertices(count: usize) -> Vec<f32> {
        let mut vertices = Vec::with_capacity(count * FLOATS_PER_VERTEX);
        for i in 0..count {
            vertices.extend_from_slice(&[i as f32, 0.0, 0.0, 0.0, 0.0, 1.0]);
        }
        vertices
    }

    #[test]
    fn valid_triangle_passes() {
        assert!(triangle(0.0).validate().is_ok());
    }

    #[test]
    fn vertex_floats_must_be_multiple_of_six() {
        let mut model = triangle(0.0);
        model.vertices.pop();
        assert!(matches!(
            model.validate(),
            Err(GeometryError::MalformedVertices(_))
        ));
    }

    #[test]
    fn indices_must_form_triangles() {
        let mut model = triangle(0.0);
        model.indices.push(1);
        assert!(matches!(
            model.validate(),
            Err(GeometryError::MalformedIndices(4))
        ));
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut model = triangle(0.0);
        model.indices[2] = 3;
        assert!(matches!(
            model.validate(),
            Err(GeometryError::IndexOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn degenerate_triangle_rejected() {
        let mut model = triangle(0.0);
        model.indices[2] = 0;
        assert!(matches!(
            model.validate(),
            Err(GeometryError::DegenerateTriangle(0))
        ));
    }

    #[test]
    fn uv_length_must_match_vertex_count() {
        let mut model = triangle(0.0);
        model.uvs = vec![0.0; 4];
        assert!(matches!(
            model.validate(),
            Err(GeometryError::MalformedUvs {
                got: 4,
                expected: 6
            })
        ));
    }

    #[test]
    fn merge_rebases_indices_and_ranges() {
        let mut merged = MergedGeometry::new();
        let first = merged.merge(&triangle(0.0)).unwrap();
        let second = merged.merge(&triangle(10.0)).unwrap();

        assert_eq!(merged.vertex_count(), 6);
        assert_eq!(merged.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(first[0].index_offset, 0);
        assert_eq!(second[0].index_offset, 6);
        assert_eq!(second[0].element_range(), 3..6);

        // Every rebased index stays inside the merged vertex set.
        let nv = merged.vertex_count() as u16;
        assert!(merged.indices.iter().all(|&i| i < nv));
    }

    #[test]
    fn merge_zero_fills_uvs_for_untextured_models() {
        let mut merged = MergedGeometry::new();
        merged.merge(&triangle(0.0)).unwrap();

        let mut textured = triangle(10.0);
        textured.uvs = vec![0.5; 6];
        textured.meshes[0].kind = MeshKind::Textured;
        merged.merge(&textured).unwrap();

        assert_eq!(merged.uvs.len(), merged.vertex_count() * 2);
        assert!(merged.uvs[..6].iter().all(|&v| v == 0.0));
        assert!(merged.uvs[6..].iter().all(|&v| v == 0.5));
        assert_eq!(merged.uv_region_offset(), 6 * VERTEX_STRIDE as u64);
    }

    #[test]
    fn merge_accepts_exactly_max_vertices() {
        let mut merged = MergedGeometry::new();
        let model = ModelGeometry {
            vertices: flat_vertices(MAX_VERTICES),
            uvs: Vec::new(),
            indices: vec![0, 1, 2],
            meshes: Vec::new(),
        };
        assert!(merged.merge(&model).is_ok());
        assert_eq!(merged.vertex_count(), MAX_VERTICES);
    }

    #[test]
    fn merge_rejects_one_vertex_past_capacity() {
        let mut merged = MergedGeometry::new();
        merged
            .merge(&ModelGeometry {
                vertices: flat_vertices(MAX_VERTICES - 2),
                uvs: Vec::new(),
                indices: vec![0, 1, 2],
                meshes: Vec::new(),
            })
            .unwrap();

        let before = merged.vertex_count();
        let result = merged.merge(&triangle(0.0));
        assert!(matches!(result, Err(GeometryError::TooManyVertices(65536))));
        // A failed merge leaves the shared arrays untouched.
        assert_eq!(merged.vertex_count(), before);
    }
}
