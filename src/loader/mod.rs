//! Model loading boundary.
//!
//! File formats produce a [`ModelSource`]: validated CPU-side geometry, a
//! material list, lights, and a transform hierarchy, with no GPU types
//! anywhere. The [`SceneBuilder`] merges any number of sources into the
//! single [`SceneBundle`] the renderer is constructed from.

pub mod obj;

use cgmath::{Matrix4, SquareMatrix, Vector3};
use log::error;

use crate::error::GeometryError;
use crate::gfx::geometry::{MergedGeometry, MeshRange, ModelGeometry};
use crate::gfx::resources::light::{Light, LightKind};
use crate::gfx::resources::material::Material;
use crate::gfx::resources::texture_resource::TextureImage;
use crate::gfx::scene::{RenderNode, SceneGraph, TransformNode};

pub use obj::load_obj;

/// One node of a model's transform hierarchy. `meshes` pairs an index
/// into the model's mesh list with an index into its material list.
#[derive(Debug, Clone)]
pub struct NodeSource {
    pub name: String,
    pub transform: Matrix4<f32>,
    pub meshes: Vec<(usize, usize)>,
    pub children: Vec<NodeSource>,
}

impl NodeSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transform: Matrix4::identity(),
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// A light as described by a model file, in the model's own space.
#[derive(Debug, Clone)]
pub struct LightSource {
    pub name: String,
    pub kind: LightKind,
    pub position: Vector3<f32>,
    pub diffuse: Vector3<f32>,
    pub specular: Vector3<f32>,
}

/// Everything a format adapter extracts from one model file.
pub struct ModelSource {
    pub name: String,
    pub geometry: ModelGeometry,
    pub materials: Vec<Material>,
    pub lights: Vec<LightSource>,
    pub root: NodeSource,
}

/// Cubemap faces in +X, -X, +Y, -Y, +Z, -Z order. Missing faces are
/// tolerated and come out black.
pub struct Environment {
    pub faces: [Option<TextureImage>; 6],
    pub alpha: f32,
}

/// The assembled scene, ready to hand to the renderer.
pub struct SceneBundle {
    pub graph: SceneGraph,
    pub geometry: MergedGeometry,
    pub materials: Vec<Material>,
    pub lights: Vec<Light>,
    pub environment: Option<Environment>,
}

/// Accumulates model sources into one graph and one merged buffer pair.
///
/// Model hierarchies hang under a shared "model" anchor node, so the host
/// can transform all loaded content at once. Lights get their own anchor
/// nodes directly under the root and follow those anchors' animations.
pub struct SceneBuilder {
    graph: SceneGraph,
    geometry: MergedGeometry,
    materials: Vec<Material>,
    lights: Vec<Light>,
    environment: Option<Environment>,
    model_anchor: crate::gfx::scene::NodeId,
}

impl SceneBuilder {
    pub fn new() -> Self {
        let mut graph = SceneGraph::new();
        let model_anchor =
            graph.insert_transform(TransformNode::new("model", Matrix4::identity()));
        graph.add_child(graph.root(), model_anchor);
        Self {
            graph,
            geometry: MergedGeometry::new(),
            materials: Vec::new(),
            lights: Vec::new(),
            environment: None,
            model_anchor,
        }
    }

    /// Merges one model into the scene. Validation happens first, so a
    /// malformed model leaves the builder untouched.
    pub fn add_model(
        &mut self,
        model: ModelSource,
    ) -> Result<crate::gfx::scene::NodeId, GeometryError> {
        if let Err(err) = model.geometry.validate() {
            error!("rejecting model `{}`: {}", model.name, err);
            return Err(err);
        }
        let ranges = match self.geometry.merge(&model.geometry) {
            Ok(ranges) => ranges,
            Err(err) => {
                error!("cannot merge model `{}`: {}", model.name, err);
                return Err(err);
            }
        };
        let material_base = self.materials.len();
        self.materials.extend(model.materials);

        let root = self.build_subtree(&model.root, &ranges, material_base);
        self.graph.add_child(self.model_anchor, root);

        for source in model.lights {
            let anchor = self.graph.insert_transform(TransformNode::new(
                &source.name,
                Matrix4::identity(),
            ));
            self.graph.add_child(self.graph.root(), anchor);
            self.lights.push(Light {
                name: source.name,
                kind: source.kind,
                position: source.position,
                diffuse: source.diffuse,
                specular: source.specular,
                node: anchor,
            });
        }

        Ok(root)
    }

    fn build_subtree(
        &mut self,
        source: &NodeSource,
        ranges: &[MeshRange],
        material_base: usize,
    ) -> crate::gfx::scene::NodeId {
        let id = self
            .graph
            .insert_transform(TransformNode::new(&source.name, source.transform));
        for &(mesh_index, material_index) in &source.meshes {
            if let Some(&range) = ranges.get(mesh_index) {
                let leaf = self
                    .graph
                    .insert_render(RenderNode::new(range, material_base + material_index));
                self.graph.add_render_child(id, leaf);
            }
        }
        for child in &source.children {
            let child_id = self.build_subtree(child, ranges, material_base);
            self.graph.add_child(id, child_id);
        }
        id
    }

    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = Some(environment);
    }

    /// Finalizes the scene. A scene with no lights at all still shades:
    /// a default white point light is placed at (100, 100, 100).
    pub fn finish(mut self) -> SceneBundle {
        if self.lights.is_empty() {
            let anchor = self.graph.insert_transform(TransformNode::new(
                "default_light",
                Matrix4::identity(),
            ));
            self.graph.add_child(self.graph.root(), anchor);
            self.lights.push(Light {
                name: "default_light".to_string(),
                kind: LightKind::Point,
                position: Vector3::new(100.0, 100.0, 100.0),
                diffuse: Vector3::new(1.0, 1.0, 1.0),
                specular: Vector3::new(1.0, 1.0, 1.0),
                node: anchor,
            });
        }
        SceneBundle {
            graph: self.graph,
            geometry: self.geometry,
            materials: self.materials,
            lights: self.lights,
            environment: self.environment,
        }
    }
}

impl Default for SceneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::geometry::{MeshKind, FLOATS_PER_VERTEX};

    fn triangle_model(name: &str) -> ModelSource {
        let mut vertices = Vec::new();
        for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            vertices.extend_from_slice(&p);
            vertices.extend_from_slice(&[0.0, 0.0, 1.0]);
        }
        let mut root = NodeSource::new(name);
        root.meshes.push((0, 0));
        ModelSource {
            name: name.to_string(),
            geometry: ModelGeometry {
                vertices,
                uvs: Vec::new(),
                indices: vec![0, 1, 2],
                meshes: vec![MeshRange {
                    kind: MeshKind::Normal,
                    index_offset: 0,
                    index_count: 3,
                }],
            },
            materials: vec![Material::new(name)],
            lights: Vec::new(),
            root,
        }
    }

    #[test]
    fn models_share_one_buffer_with_rebased_ranges() {
        let mut builder = SceneBuilder::new();
        let a = builder.add_model(triangle_model("a")).unwrap();
        let b = builder.add_model(triangle_model("b")).unwrap();
        assert_ne!(a, b);

        let bundle = builder.finish();
        assert_eq!(bundle.geometry.vertices.len(), 6 * FLOATS_PER_VERTEX);
        assert_eq!(bundle.geometry.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(bundle.materials.len(), 2);

        // The second model's render leaf points past the first's indices.
        let node = bundle.graph.transform(b).unwrap();
        let leaf = bundle.graph.render(node.render_children[0]).unwrap();
        assert_eq!(leaf.mesh.index_offset, 6);
        assert_eq!(leaf.material, 1);
    }

    #[test]
    fn malformed_model_leaves_builder_untouched() {
        let mut builder = SceneBuilder::new();
        builder.add_model(triangle_model("a")).unwrap();

        let mut bad = triangle_model("bad");
        bad.geometry.indices = vec![0, 1, 9];
        assert!(builder.add_model(bad).is_err());

        let bundle = builder.finish();
        assert_eq!(bundle.geometry.indices.len(), 3);
        assert_eq!(bundle.materials.len(), 1);
    }

    #[test]
    fn empty_scene_gets_a_default_light() {
        let bundle = SceneBuilder::new().finish();
        assert_eq!(bundle.lights.len(), 1);
        let light = &bundle.lights[0];
        assert_eq!(light.kind, LightKind::Point);
        assert_eq!(light.position, Vector3::new(100.0, 100.0, 100.0));
        assert!(bundle.graph.contains(light.node));
    }

    #[test]
    fn model_lights_suppress_the_default() {
        let mut model = triangle_model("lit");
        model.lights.push(LightSource {
            name: "key".to_string(),
            kind: LightKind::Directional,
            position: Vector3::new(0.0, -1.0, 0.0),
            diffuse: Vector3::new(1.0, 1.0, 1.0),
            specular: Vector3::new(1.0, 1.0, 1.0),
        });
        let mut builder = SceneBuilder::new();
        builder.add_model(model).unwrap();
        let bundle = builder.finish();
        assert_eq!(bundle.lights.len(), 1);
        assert_eq!(bundle.lights[0].name, "key");
    }

    #[test]
    fn model_roots_hang_under_the_shared_anchor() {
        let mut builder = SceneBuilder::new();
        let id = builder.add_model(triangle_model("a")).unwrap();
        let bundle = builder.finish();

        let anchor = bundle.graph.bind_animation("model").unwrap();
        let anchor_node = bundle.graph.transform(anchor).unwrap();
        assert!(anchor_node.children.contains(&id));
    }
}
