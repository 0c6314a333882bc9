//! Frame orchestration for a scene embedded in a host surface.
//!
//! The renderer owns the merged scene buffers, the shader cache, and the
//! per-node uniform table. Each frame it recomputes world matrices, places
//! the lights in eye space, uploads only the dirty frame uniforms, then
//! draws opaque materials followed by transparent ones into the host's
//! color view. The host keeps ownership of the surface: the color
//! attachment loads existing content, and all depth, cull, and blend state
//! is baked into pipelines rather than toggled globally.

use std::collections::HashMap;
use std::sync::Arc;

use cgmath::{perspective, Deg, Matrix4, Vector3};
use log::warn;
use wgpu::util::DeviceExt;

use crate::gfx::geometry::MeshRange;
use crate::gfx::resources::light::{LightKind, MAX_LIGHTS};
use crate::gfx::resources::material::Material;
use crate::gfx::resources::texture_resource::TextureResource;
use crate::gfx::scene::{NodeId, SceneGraph};
use crate::loader::SceneBundle;

use super::render_state::RenderState;
use super::shader::{NodeUniform, ShaderCache, SharedLayouts};

/// Rectangle of the host surface the scene renders into, in pixels.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One pending indexed draw: a render node reached through a transform
/// node, with the material to bind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCmd {
    pub node: NodeId,
    pub material: usize,
    pub mesh: MeshRange,
}

/// Plans the draws of one shader for one pass, in traversal order.
///
/// Invisible transform nodes prune their whole subtree; render nodes are
/// kept when they are visible, their material maps to `shader`, and the
/// material's transparency matches the pass.
pub fn collect_draws(
    graph: &SceneGraph,
    materials: &[Material],
    material_shader: &[usize],
    shader: usize,
    transparent: bool,
) -> Vec<DrawCmd> {
    let mut draws = Vec::new();
    let mut stack = vec![graph.root()];
    while let Some(id) = stack.pop() {
        let Some(node) = graph.transform(id) else {
            continue;
        };
        if !node.visible {
            continue;
        }
        for &render_id in &node.render_children {
            let Some(render) = graph.render(render_id) else {
                continue;
            };
            if !render.visible {
                continue;
            }
            let material = render.material;
            if material_shader.get(material) != Some(&shader) {
                continue;
            }
            let is_transparent = materials
                .get(material)
                .map(|m| m.transparent)
                .unwrap_or(false);
            if is_transparent != transparent {
                continue;
            }
            draws.push(DrawCmd {
                node: id,
                material,
                mesh: render.mesh,
            });
        }
        // Reversed so the first child is visited first.
        stack.extend(node.children.iter().rev().copied());
    }
    draws
}

struct NodeGpu {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl NodeGpu {
    fn new(device: &wgpu::Device, layouts: &SharedLayouts, world: &Matrix4<f32>) -> Self {
        let uniform = NodeUniform::from_modelview(world);
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Node Uniform Buffer"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Node Bind Group"),
            layout: &layouts.node.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind_group }
    }
}

pub struct Renderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    graph: SceneGraph,
    state: RenderState,
    materials: Vec<Material>,
    material_shader: Vec<usize>,
    shaders: ShaderCache,
    layouts: SharedLayouts,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    uv_offset: u64,
    node_gpu: HashMap<NodeId, NodeGpu>,
    // Referenced by material bind groups; kept for the renderer's lifetime.
    _environment: Option<TextureResource>,
    viewport: Option<Viewport>,
}

impl Renderer {
    /// Builds all GPU resources for a loaded scene, once, on the context
    /// thread: the shared vertex/index buffers, one shader variant per
    /// distinct capability signature, material bind groups (freeing the
    /// CPU images), the environment cubemap, and a uniform buffer per
    /// transform node. The render state starts fully dirty so the first
    /// frame uploads everything.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        scene: SceneBundle,
        color_format: wgpu::TextureFormat,
    ) -> Self {
        let SceneBundle {
            graph,
            geometry,
            mut materials,
            mut lights,
            environment,
        } = scene;

        let env_alpha = environment.as_ref().map(|env| env.alpha);
        let environment = environment.as_ref().and_then(|env| {
            TextureResource::create_cubemap(&device, &queue, &env.faces, "Scene Environment")
        });

        if lights.len() > MAX_LIGHTS {
            warn!(
                "scene defines {} lights, only the first {} will shade",
                lights.len(),
                MAX_LIGHTS
            );
            lights.truncate(MAX_LIGHTS);
        }
        let light_kinds: Vec<LightKind> = lights.iter().map(|l| l.kind).collect();

        // Shared vertex buffer: interleaved region then the UV region.
        let uv_offset = geometry.uv_region_offset();
        let mut vertex_bytes: Vec<u8> = Vec::with_capacity(
            geometry.vertices.len() * 4 + geometry.uvs.len() * 4,
        );
        vertex_bytes.extend_from_slice(bytemuck::cast_slice(&geometry.vertices));
        vertex_bytes.extend_from_slice(bytemuck::cast_slice(&geometry.uvs));
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Vertex Buffer"),
            contents: &vertex_bytes,
            usage: wgpu::BufferUsages::VERTEX,
        });

        let mut index_bytes: Vec<u8> =
            bytemuck::cast_slice(&geometry.indices).to_vec();
        // Buffer sizes must be 4-byte aligned; an odd index count leaves
        // two trailing bytes.
        if index_bytes.len() % 4 != 0 {
            index_bytes.extend_from_slice(&[0, 0]);
        }
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Index Buffer"),
            contents: &index_bytes,
            usage: wgpu::BufferUsages::INDEX,
        });

        let layouts = SharedLayouts::new(&device);

        // One shader per distinct capability signature; initialize each
        // exactly once, then hand its material layout to every material
        // that shares it.
        let mut shaders = ShaderCache::new();
        let mut material_shader = Vec::with_capacity(materials.len());
        for material in &mut materials {
            let caps = material.resolve_caps(environment.is_some());
            let (index, created) = shaders.lookup_or_create(caps, &light_kinds);
            material_shader.push(index);
            if created {
                if let Some(shader) = shaders.get_mut(index) {
                    shader.initialize(&device, &layouts, color_format);
                }
            }
            if let Some(shader) = shaders.get_mut(index) {
                shader.register_material(material.transparent);
            }
            match shaders.get(index).and_then(|s| s.material_layout()) {
                Some(layout) => {
                    material.init_gpu(&device, &queue, layout, environment.as_ref())
                }
                None => warn!(
                    "material `{}` belongs to a failed shader and will not draw",
                    material.name
                ),
            }
        }

        let mut node_gpu = HashMap::new();
        let identity = Matrix4::from_scale(1.0);
        for id in graph.transform_ids() {
            node_gpu.insert(id, NodeGpu::new(&device, &layouts, &identity));
        }

        let mut state = RenderState::new(lights);
        if let Some(alpha) = env_alpha {
            state.set_env_alpha(alpha);
        }
        state.set_dirty();

        Self {
            device,
            queue,
            graph,
            state,
            materials,
            material_shader,
            shaders,
            layouts,
            vertex_buffer,
            index_buffer,
            uv_offset,
            node_gpu,
            _environment: environment,
            viewport: None,
        }
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RenderState {
        &mut self.state
    }

    /// Resolves an animation target by node name, once; drive it with
    /// [`set_animation`](Self::set_animation) afterwards.
    pub fn bind_animation(&self, name: &str) -> Result<NodeId, crate::error::SceneError> {
        self.graph.bind_animation(name)
    }

    pub fn set_animation(&mut self, node: NodeId, animation: Option<Matrix4<f32>>) {
        self.graph.set_animation(node, animation);
    }

    /// Slot of a named light. A miss is reported, not fatal.
    pub fn light_index(&self, name: &str) -> Option<usize> {
        let index = self.state.light_index(name);
        if index.is_none() {
            warn!("no light named `{}` in the scene", name);
        }
        index
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.state.set_visible(visible);
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.state.set_opacity(opacity);
    }

    pub fn set_ambient(&mut self, ambient: Vector3<f32>) {
        self.state.set_ambient(ambient);
    }

    pub fn set_env_alpha(&mut self, alpha: f32) {
        self.state.set_env_alpha(alpha);
    }

    pub fn set_light_diffuse(&mut self, index: usize, diffuse: Vector3<f32>) {
        self.state.set_light_diffuse(index, diffuse);
    }

    pub fn set_light_specular(&mut self, index: usize, specular: Vector3<f32>) {
        self.state.set_light_specular(index, specular);
    }

    pub fn set_light_position(&mut self, index: usize, position: Vector3<f32>) {
        self.state.set_light_position(index, position);
    }

    /// Updates the viewport rectangle. The projection (60 degree vertical
    /// field of view, near 0.1, far 100) is only recomputed when the
    /// rectangle actually changes.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.viewport == Some(viewport) {
            return;
        }
        let aspect = if viewport.height > 0.0 {
            viewport.width / viewport.height
        } else {
            1.0
        };
        self.state
            .set_projection(perspective(Deg(60.0), aspect, 0.1, 100.0));
        self.viewport = Some(viewport);
    }

    /// Records the frame into `encoder`.
    ///
    /// When the scene is invisible this issues no GPU commands at all.
    /// Otherwise: world matrices and light placements are refreshed, node
    /// uniforms uploaded, dirty frame uniforms written per shader, and one
    /// render pass draws every opaque material's nodes before every
    /// transparent one's. The host's color content is loaded, the depth
    /// view (dedicated to this scene) is cleared. All dirty bits are
    /// cleared exactly once, at the end.
    pub fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        color_view: &wgpu::TextureView,
        depth_view: &wgpu::TextureView,
    ) {
        if !self.state.visible() {
            return;
        }

        self.graph.update_world_matrices();

        // Nodes can come and go between frames through the graph handle.
        self.node_gpu.retain(|id, _| self.graph.contains(*id));
        for id in self.graph.transform_ids() {
            if !self.node_gpu.contains_key(&id) {
                let world = match self.graph.transform(id) {
                    Some(node) => node.world,
                    None => continue,
                };
                self.node_gpu
                    .insert(id, NodeGpu::new(&self.device, &self.layouts, &world));
            }
        }

        let mut finals = Vec::new();
        for (i, slot) in self.state.lights().iter().enumerate() {
            if let Some(anchor) = self.graph.transform(slot.light.node) {
                finals.push((i, slot.light.eye_space_position(&anchor.world)));
            }
        }
        for (i, position) in finals {
            self.state.set_light_final_position(i, position);
        }

        for (id, gpu) in &self.node_gpu {
            if let Some(node) = self.graph.transform(*id) {
                let uniform = NodeUniform::from_modelview(&node.world);
                self.queue
                    .write_buffer(&gpu.buffer, 0, bytemuck::bytes_of(&uniform));
            }
        }

        for (_, shader) in self.shaders.iter() {
            shader.update_render_state(&self.queue, &self.state);
        }

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Scene Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    // The host cleared and may have drawn already.
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        if let Some(viewport) = self.viewport {
            render_pass.set_viewport(
                viewport.x,
                viewport.y,
                viewport.width,
                viewport.height,
                0.0,
                1.0,
            );
        }

        render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..self.uv_offset));

        for transparent in [false, true] {
            for (shader_index, shader) in self.shaders.iter() {
                if !shader.set_blend(transparent) {
                    continue;
                }
                let (Some(pipeline), Some(frame_bind_group)) =
                    (shader.pipeline(transparent), shader.frame_bind_group())
                else {
                    continue;
                };

                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, frame_bind_group, &[]);
                if shader.uses_uv() {
                    render_pass.set_vertex_buffer(1, self.vertex_buffer.slice(self.uv_offset..));
                }

                let draws = collect_draws(
                    &self.graph,
                    &self.materials,
                    &self.material_shader,
                    shader_index,
                    transparent,
                );

                let mut last_node = None;
                let mut last_material = None;
                for draw in draws {
                    if last_node != Some(draw.node) {
                        let Some(node) = self.node_gpu.get(&draw.node) else {
                            continue;
                        };
                        render_pass.set_bind_group(1, &node.bind_group, &[]);
                        last_node = Some(draw.node);
                    }
                    // Consecutive draws sharing a material keep its bindings.
                    if last_material != Some(draw.material) {
                        let Some(bind_group) =
                            self.materials.get(draw.material).and_then(|m| m.bind_group())
                        else {
                            continue;
                        };
                        render_pass.set_bind_group(2, bind_group, &[]);
                        last_material = Some(draw.material);
                    }
                    render_pass.draw_indexed(draw.mesh.element_range(), 0, 0..1);
                }
            }
        }

        drop(render_pass);
        self.state.reset_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::geometry::MeshKind;
    use crate::gfx::scene::{RenderNode, TransformNode};
    use cgmath::SquareMatrix;

    fn mesh(offset: u64) -> MeshRange {
        MeshRange {
            kind: MeshKind::Normal,
            index_offset: offset,
            index_count: 3,
        }
    }

    /// Graph with one opaque node (material 0, shader 0) and one
    /// transparent node (material 1, shader 0).
    fn two_material_graph() -> (SceneGraph, Vec<Material>, Vec<usize>, NodeId, NodeId) {
        let mut graph = SceneGraph::new();
        let solid = graph.insert_transform(TransformNode::new("solid", Matrix4::identity()));
        let glass = graph.insert_transform(TransformNode::new("glass", Matrix4::identity()));
        graph.add_child(graph.root(), solid);
        graph.add_child(graph.root(), glass);
        let solid_leaf = graph.insert_render(RenderNode::new(mesh(0), 0));
        let glass_leaf = graph.insert_render(RenderNode::new(mesh(6), 1));
        graph.add_render_child(solid, solid_leaf);
        graph.add_render_child(glass, glass_leaf);

        let materials = vec![
            Material::new("solid"),
            Material::new("glass").with_opacity(0.5),
        ];
        (graph, materials, vec![0, 0], solid, glass)
    }

    /// Builds the material-to-shader map the same way `Renderer::new`
    /// does, minus the GPU-side initialization.
    fn shader_map_for(materials: &mut [Material], has_env: bool) -> Vec<usize> {
        let mut shaders = ShaderCache::new();
        let mut map = Vec::with_capacity(materials.len());
        for material in materials.iter_mut() {
            let caps = material.resolve_caps(has_env);
            let (index, _) = shaders.lookup_or_create(caps, &[]);
            map.push(index);
        }
        map
    }

    #[test]
    fn shader_map_covers_every_material() {
        let (graph, mut materials, _, solid, glass) = two_material_graph();
        let shader_map = shader_map_for(&mut materials, false);
        assert_eq!(shader_map.len(), materials.len());

        // Both materials are untextured, so they share shader 0 and the
        // built map must plan one draw per pass.
        let opaque = collect_draws(&graph, &materials, &shader_map, 0, false);
        assert_eq!(opaque.len(), 1);
        assert_eq!(opaque[0].node, solid);
        let blended = collect_draws(&graph, &materials, &shader_map, 0, true);
        assert_eq!(blended.len(), 1);
        assert_eq!(blended[0].node, glass);
    }

    #[test]
    fn passes_split_by_material_transparency() {
        let (graph, materials, shader_map, solid, glass) = two_material_graph();

        let opaque = collect_draws(&graph, &materials, &shader_map, 0, false);
        assert_eq!(opaque.len(), 1);
        assert_eq!(opaque[0].node, solid);
        assert_eq!(opaque[0].material, 0);

        let blended = collect_draws(&graph, &materials, &shader_map, 0, true);
        assert_eq!(blended.len(), 1);
        assert_eq!(blended[0].node, glass);
    }

    #[test]
    fn other_shaders_draw_nothing() {
        let (graph, materials, shader_map, _, _) = two_material_graph();
        assert!(collect_draws(&graph, &materials, &shader_map, 1, false).is_empty());
        assert!(collect_draws(&graph, &materials, &shader_map, 1, true).is_empty());
    }

    #[test]
    fn invisible_transform_prunes_its_subtree() {
        let (mut graph, materials, shader_map, solid, _) = two_material_graph();
        graph.transform_mut(solid).unwrap().visible = false;
        assert!(collect_draws(&graph, &materials, &shader_map, 0, false).is_empty());
        // The transparent sibling is unaffected.
        assert_eq!(collect_draws(&graph, &materials, &shader_map, 0, true).len(), 1);
    }

    #[test]
    fn invisible_render_node_is_skipped() {
        let mut graph = SceneGraph::new();
        let node = graph.insert_transform(TransformNode::new("n", Matrix4::identity()));
        graph.add_child(graph.root(), node);
        let leaf = graph.insert_render(RenderNode::new(mesh(0), 0));
        graph.add_render_child(node, leaf);
        graph.render_mut(leaf).unwrap().visible = false;

        let materials = vec![Material::new("m")];
        assert!(collect_draws(&graph, &materials, &[0], 0, false).is_empty());
    }

    #[test]
    fn invisible_root_plans_nothing() {
        let (mut graph, materials, shader_map, _, _) = two_material_graph();
        let root = graph.root();
        graph.transform_mut(root).unwrap().visible = false;
        assert!(collect_draws(&graph, &materials, &shader_map, 0, false).is_empty());
        assert!(collect_draws(&graph, &materials, &shader_map, 0, true).is_empty());
    }

    #[test]
    fn traversal_keeps_sibling_order() {
        let mut graph = SceneGraph::new();
        let materials = vec![Material::new("m")];
        let mut expected = Vec::new();
        for i in 0..3 {
            let node =
                graph.insert_transform(TransformNode::new(&format!("n{}", i), Matrix4::identity()));
            graph.add_child(graph.root(), node);
            let leaf = graph.insert_render(RenderNode::new(mesh(i * 6), 0));
            graph.add_render_child(node, leaf);
            expected.push(node);
        }

        let draws = collect_draws(&graph, &materials, &[0], 0, false);
        let nodes: Vec<NodeId> = draws.iter().map(|d| d.node).collect();
        assert_eq!(nodes, expected);
    }
}
