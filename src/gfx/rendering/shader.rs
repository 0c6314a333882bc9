//! Data-driven shader variants and the per-renderer shader cache.
//!
//! One WGSL generator covers every material: the capability signature
//! decides which texture and cubemap bindings exist, and the scene's light
//! list is unrolled into the fragment source with the per-kind L-vector
//! formula baked in. Variants are deduplicated by signature, so two
//! materials with the same flags share modules, pipelines, and the frame
//! uniform buffer.

use std::collections::HashMap;
use std::fmt::Write;

use cgmath::{Matrix, Matrix3, Matrix4, SquareMatrix};
use log::{debug, warn};

use crate::gfx::resources::light::{LightKind, MAX_LIGHTS};
use crate::gfx::resources::material::ShaderCaps;
use crate::gfx::scene::vertex::{SceneVertex, UvCoord};
use crate::wgpu_utils::{
    binding_builder::{BindGroupBuilder, BindGroupLayoutBuilder, BindGroupLayoutWithDesc},
    binding_types,
};

use super::render_state::{
    dirty_light_diffuse, dirty_light_position, dirty_light_specular, RenderState, DIRTY_AMBIENT,
    DIRTY_ENV_ALPHA, DIRTY_OPACITY, DIRTY_PROJECTION,
};

// Byte layout of the frame uniform block. Dirty-gated writes address
// fields individually, so these offsets and the WGSL struct must agree.
pub const OFFSET_PROJECTION: u64 = 0;
pub const OFFSET_AMBIENT: u64 = 64;
pub const OFFSET_OPACITY: u64 = 76;
pub const OFFSET_ENV_ALPHA: u64 = 80;
pub const OFFSET_LIGHTS: u64 = 96;
pub const LIGHT_STRIDE: u64 = 48;
pub const FRAME_UNIFORMS_SIZE: u64 = OFFSET_LIGHTS + MAX_LIGHTS as u64 * LIGHT_STRIDE;

/// Per-transform-node uniform block: modelview plus the normal matrix,
/// stored as three padded columns to match WGSL's mat3x3 layout.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NodeUniform {
    pub modelview: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 3],
}

impl NodeUniform {
    pub fn from_modelview(modelview: &Matrix4<f32>) -> Self {
        let upper = Matrix3::from_cols(
            modelview.x.truncate(),
            modelview.y.truncate(),
            modelview.z.truncate(),
        );
        let normal = upper
            .invert()
            .map(|inv| inv.transpose())
            .unwrap_or_else(Matrix3::identity);
        Self {
            modelview: (*modelview).into(),
            normal: [
                [normal.x.x, normal.x.y, normal.x.z, 0.0],
                [normal.y.x, normal.y.y, normal.y.z, 0.0],
                [normal.z.x, normal.z.y, normal.z.z, 0.0],
            ],
        }
    }
}

/// Bind group layouts shared by every shader variant: group 0 holds the
/// frame uniforms, group 1 the per-node uniforms. Group 2 is the
/// caps-dependent material layout each variant builds for itself.
pub struct SharedLayouts {
    pub frame: BindGroupLayoutWithDesc,
    pub node: BindGroupLayoutWithDesc,
}

impl SharedLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            frame: BindGroupLayoutBuilder::new()
                .next_binding_all(binding_types::uniform())
                .create(device, "Frame Bind Group Layout"),
            node: BindGroupLayoutBuilder::new()
                .next_binding_vertex(binding_types::uniform())
                .create(device, "Node Bind Group Layout"),
        }
    }
}

struct ShaderGpu {
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    material_layout: BindGroupLayoutWithDesc,
    opaque_pipeline: wgpu::RenderPipeline,
    blend_pipeline: wgpu::RenderPipeline,
}

/// One generated shader, serving every material that shares its
/// capability signature.
pub struct ShaderVariant {
    caps: ShaderCaps,
    light_kinds: Vec<LightKind>,
    has_opaque: bool,
    has_transparency: bool,
    gpu: Option<ShaderGpu>,
    failed: bool,
}

impl ShaderVariant {
    pub fn new(caps: ShaderCaps, light_kinds: &[LightKind]) -> Self {
        debug_assert!(light_kinds.len() <= MAX_LIGHTS);
        Self {
            caps,
            light_kinds: light_kinds.iter().map(|k| k.shading_kind()).collect(),
            has_opaque: false,
            has_transparency: false,
            gpu: None,
            failed: false,
        }
    }

    pub fn caps(&self) -> ShaderCaps {
        self.caps
    }

    /// Records a material using this shader, widening the passes the
    /// shader takes part in.
    pub fn register_material(&mut self, transparent: bool) {
        if transparent {
            self.has_transparency = true;
        } else {
            self.has_opaque = true;
        }
    }

    /// Whether the shader has anything to draw in the given pass.
    pub fn set_blend(&self, transparent: bool) -> bool {
        if transparent {
            self.has_transparency
        } else {
            self.has_opaque
        }
    }

    /// Which vertex attributes the variant consumes: position and normal
    /// always, UV only for textured signatures.
    pub fn uses_uv(&self) -> bool {
        self.caps.uses_uv()
    }

    pub fn material_layout(&self) -> Option<&BindGroupLayoutWithDesc> {
        self.gpu.as_ref().map(|gpu| &gpu.material_layout)
    }

    pub fn frame_bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.gpu.as_ref().map(|gpu| &gpu.frame_bind_group)
    }

    pub fn pipeline(&self, transparent: bool) -> Option<&wgpu::RenderPipeline> {
        self.gpu.as_ref().map(|gpu| {
            if transparent {
                &gpu.blend_pipeline
            } else {
                &gpu.opaque_pipeline
            }
        })
    }

    /// Generates the WGSL source for this signature and light list.
    pub fn source(&self) -> String {
        generate_source(self.caps, &self.light_kinds)
    }

    /// One-time GPU initialization: compiles the module and builds both
    /// pipelines inside an error scope. On validation failure the variant
    /// is left degraded and draws nothing; the scene keeps rendering.
    pub fn initialize(
        &mut self,
        device: &wgpu::Device,
        layouts: &SharedLayouts,
        color_format: wgpu::TextureFormat,
    ) {
        if self.gpu.is_some() || self.failed {
            return;
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let label = format!("Scene Shader caps={:#05b}", self.caps.bits());
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(self.source().into()),
        });

        let mut material_builder = BindGroupLayoutBuilder::new().binding(
            0,
            wgpu::ShaderStages::FRAGMENT,
            binding_types::uniform(),
        );
        if self.caps.has_diffuse_texture() {
            material_builder = material_builder
                .binding(1, wgpu::ShaderStages::FRAGMENT, binding_types::texture_2d())
                .binding(
                    2,
                    wgpu::ShaderStages::FRAGMENT,
                    binding_types::sampler(wgpu::SamplerBindingType::Filtering),
                );
        }
        if self.caps.has_specular_texture() {
            material_builder = material_builder
                .binding(3, wgpu::ShaderStages::FRAGMENT, binding_types::texture_2d())
                .binding(
                    4,
                    wgpu::ShaderStages::FRAGMENT,
                    binding_types::sampler(wgpu::SamplerBindingType::Filtering),
                );
        }
        if self.caps.has_env_map() {
            material_builder = material_builder
                .binding(
                    5,
                    wgpu::ShaderStages::FRAGMENT,
                    binding_types::texture_cube(),
                )
                .binding(
                    6,
                    wgpu::ShaderStages::FRAGMENT,
                    binding_types::sampler(wgpu::SamplerBindingType::Filtering),
                );
        }
        let material_layout = material_builder.create(device, &format!("{} Material", label));

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} Frame Uniforms", label)),
            size: FRAME_UNIFORMS_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = BindGroupBuilder::new(&layouts.frame)
            .resource(frame_buffer.as_entire_binding())
            .create(device, &format!("{} Frame Bind Group", label));

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Layout", label)),
            bind_group_layouts: &[
                &layouts.frame.layout,
                &layouts.node.layout,
                &material_layout.layout,
            ],
            push_constant_ranges: &[],
        });

        let mut vertex_buffers = vec![SceneVertex::desc()];
        if self.uses_uv() {
            vertex_buffers.push(UvCoord::desc());
        }

        let make_pipeline = |pass_label: &str, blend: Option<wgpu::BlendState>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!("{} {}", label, pass_label)),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: color_format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Some(wgpu::Face::Back),
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth32Float,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let opaque_pipeline = make_pipeline("Opaque", Some(wgpu::BlendState::REPLACE));
        let blend_pipeline = make_pipeline("Blend", Some(wgpu::BlendState::ALPHA_BLENDING));

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            warn!(
                "shader variant caps={:#05b} failed validation, its materials will not draw: {}",
                self.caps.bits(),
                error
            );
            self.failed = true;
            return;
        }

        debug!("created shader variant caps={:#05b}", self.caps.bits());
        self.gpu = Some(ShaderGpu {
            frame_buffer,
            frame_bind_group,
            material_layout,
            opaque_pipeline,
            blend_pipeline,
        });
    }

    /// Uploads the frame uniform fields whose dirty bits are set. Each
    /// write targets the field's byte offset, so an unchanged projection
    /// or light color moves no bytes.
    pub fn update_render_state(&self, queue: &wgpu::Queue, state: &RenderState) {
        let Some(gpu) = &self.gpu else {
            return;
        };

        if state.is_dirty(DIRTY_PROJECTION) {
            let projection: [[f32; 4]; 4] = (*state.projection()).into();
            queue.write_buffer(
                &gpu.frame_buffer,
                OFFSET_PROJECTION,
                bytemuck::bytes_of(&projection),
            );
        }
        if state.is_dirty(DIRTY_AMBIENT) {
            let ambient: [f32; 3] = state.ambient().into();
            queue.write_buffer(&gpu.frame_buffer, OFFSET_AMBIENT, bytemuck::bytes_of(&ambient));
        }
        if state.is_dirty(DIRTY_OPACITY) {
            let opacity = state.opacity();
            queue.write_buffer(&gpu.frame_buffer, OFFSET_OPACITY, bytemuck::bytes_of(&opacity));
        }
        if state.is_dirty(DIRTY_ENV_ALPHA) {
            let alpha = state.env_alpha();
            queue.write_buffer(
                &gpu.frame_buffer,
                OFFSET_ENV_ALPHA,
                bytemuck::bytes_of(&alpha),
            );
        }

        for (i, slot) in state.lights().iter().enumerate().take(MAX_LIGHTS) {
            let base = OFFSET_LIGHTS + i as u64 * LIGHT_STRIDE;
            if state.is_dirty(dirty_light_position(i)) {
                let position = [
                    slot.final_position.x,
                    slot.final_position.y,
                    slot.final_position.z,
                    0.0,
                ];
                queue.write_buffer(&gpu.frame_buffer, base, bytemuck::bytes_of(&position));
            }
            if state.is_dirty(dirty_light_diffuse(i)) {
                let diffuse = [
                    slot.light.diffuse.x,
                    slot.light.diffuse.y,
                    slot.light.diffuse.z,
                    0.0,
                ];
                queue.write_buffer(&gpu.frame_buffer, base + 16, bytemuck::bytes_of(&diffuse));
            }
            if state.is_dirty(dirty_light_specular(i)) {
                let specular = [
                    slot.light.specular.x,
                    slot.light.specular.y,
                    slot.light.specular.z,
                    0.0,
                ];
                queue.write_buffer(&gpu.frame_buffer, base + 32, bytemuck::bytes_of(&specular));
            }
        }
    }
}

/// Generates the WGSL module for a capability signature and light list.
///
/// The light loop is unrolled at generation time; point (and spot) lights
/// get the position-relative L vector, directional lights negate their
/// stored travel direction to point at the light.
pub fn generate_source(caps: ShaderCaps, light_kinds: &[LightKind]) -> String {
    let mut s = String::new();

    s.push_str(
        "struct LightData {\n\
         \x20   position: vec4<f32>,\n\
         \x20   diffuse: vec4<f32>,\n\
         \x20   specular: vec4<f32>,\n\
         };\n\n\
         struct FrameUniforms {\n\
         \x20   projection: mat4x4<f32>,\n\
         \x20   ambient: vec4<f32>,\n\
         \x20   env: vec4<f32>,\n\
         \x20   lights: array<LightData, 5>,\n\
         };\n\n\
         struct NodeUniforms {\n\
         \x20   modelview: mat4x4<f32>,\n\
         \x20   normal: mat3x3<f32>,\n\
         };\n\n\
         struct MaterialUniforms {\n\
         \x20   ambient: vec4<f32>,\n\
         \x20   diffuse: vec4<f32>,\n\
         \x20   specular: vec4<f32>,\n\
         \x20   params: vec4<f32>,\n\
         };\n\n\
         @group(0) @binding(0) var<uniform> frame: FrameUniforms;\n\
         @group(1) @binding(0) var<uniform> node: NodeUniforms;\n\
         @group(2) @binding(0) var<uniform> material: MaterialUniforms;\n",
    );

    if caps.has_diffuse_texture() {
        s.push_str(
            "@group(2) @binding(1) var diffuse_texture: texture_2d<f32>;\n\
             @group(2) @binding(2) var diffuse_sampler: sampler;\n",
        );
    }
    if caps.has_specular_texture() {
        s.push_str(
            "@group(2) @binding(3) var specular_texture: texture_2d<f32>;\n\
             @group(2) @binding(4) var specular_sampler: sampler;\n",
        );
    }
    if caps.has_env_map() {
        s.push_str(
            "@group(2) @binding(5) var env_texture: texture_cube<f32>;\n\
             @group(2) @binding(6) var env_sampler: sampler;\n",
        );
    }

    s.push_str("\nstruct VertexInput {\n");
    s.push_str("    @location(0) position: vec3<f32>,\n");
    s.push_str("    @location(1) normal: vec3<f32>,\n");
    if caps.uses_uv() {
        s.push_str("    @location(2) uv: vec2<f32>,\n");
    }
    s.push_str("};\n\nstruct VertexOutput {\n");
    s.push_str("    @builtin(position) clip_position: vec4<f32>,\n");
    s.push_str("    @location(0) eye_position: vec3<f32>,\n");
    s.push_str("    @location(1) normal: vec3<f32>,\n");
    if caps.uses_uv() {
        s.push_str("    @location(2) uv: vec2<f32>,\n");
    }
    s.push_str("};\n\n");

    s.push_str(
        "@vertex\n\
         fn vs_main(in: VertexInput) -> VertexOutput {\n\
         \x20   var out: VertexOutput;\n\
         \x20   let eye = node.modelview * vec4<f32>(in.position, 1.0);\n\
         \x20   out.clip_position = frame.projection * eye;\n\
         \x20   out.eye_position = eye.xyz / eye.w;\n\
         \x20   out.normal = node.normal * in.normal;\n",
    );
    if caps.uses_uv() {
        s.push_str("    out.uv = in.uv;\n");
    }
    s.push_str("    return out;\n}\n\n");

    s.push_str(
        "@fragment\n\
         fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {\n\
         \x20   let n = normalize(in.normal);\n\
         \x20   let v = normalize(-in.eye_position);\n\
         \x20   var diffuse_acc = vec3<f32>(0.0);\n\
         \x20   var specular_acc = vec3<f32>(0.0);\n",
    );

    for (i, kind) in light_kinds.iter().enumerate().take(MAX_LIGHTS) {
        match kind.shading_kind() {
            LightKind::Directional => {
                // The stored vector is the light's travel direction;
                // shading needs the surface-to-light direction.
                let _ = writeln!(
                    s,
                    "    let l{i} = normalize(-frame.lights[{i}].position.xyz);"
                );
            }
            _ => {
                let _ = writeln!(
                    s,
                    "    let l{i} = normalize(frame.lights[{i}].position.xyz - in.eye_position);"
                );
            }
        }
        let _ = writeln!(s, "    let nl{i} = max(dot(n, l{i}), 0.0);");
        let _ = writeln!(
            s,
            "    diffuse_acc = diffuse_acc + frame.lights[{i}].diffuse.rgb * nl{i};"
        );
        let _ = writeln!(s, "    let h{i} = normalize(l{i} + v);");
        let _ = writeln!(
            s,
            "    specular_acc = specular_acc + frame.lights[{i}].specular.rgb * pow(max(dot(n, h{i}), 0.0), material.params.x);"
        );
    }

    s.push_str("    var kd = material.diffuse.rgb;\n");
    if caps.has_diffuse_texture() {
        s.push_str("    kd = kd * textureSample(diffuse_texture, diffuse_sampler, in.uv).rgb;\n");
    }
    s.push_str("    var ks = material.specular.rgb;\n");
    if caps.has_specular_texture() {
        s.push_str("    ks = ks * textureSample(specular_texture, specular_sampler, in.uv).rgb;\n");
    }
    s.push_str(
        "    var color = material.ambient.rgb * frame.ambient.rgb + kd * diffuse_acc + ks * specular_acc;\n",
    );
    if caps.has_env_map() {
        s.push_str(
            "    let r = reflect(-v, n);\n\
             \x20   let env_color = textureSample(env_texture, env_sampler, r).rgb;\n\
             \x20   color = mix(color, env_color, material.params.y * frame.env.x);\n",
        );
    }
    s.push_str(
        "    let alpha = material.diffuse.a * frame.ambient.a;\n\
         \x20   return vec4<f32>(color, alpha);\n\
         }\n",
    );

    s
}

/// Per-renderer shader cache keyed by capability signature.
pub struct ShaderCache {
    by_caps: HashMap<u8, usize>,
    shaders: Vec<ShaderVariant>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self {
            by_caps: HashMap::new(),
            shaders: Vec::new(),
        }
    }

    /// Returns the index of the shader for `caps`, creating the variant on
    /// a miss. `created` tells the caller to run the one-time GPU
    /// initialization.
    pub fn lookup_or_create(
        &mut self,
        caps: ShaderCaps,
        light_kinds: &[LightKind],
    ) -> (usize, bool) {
        if let Some(&index) = self.by_caps.get(&caps.bits()) {
            debug!("shader cache hit for caps={:#05b}", caps.bits());
            return (index, false);
        }
        let index = self.shaders.len();
        self.shaders.push(ShaderVariant::new(caps, light_kinds));
        self.by_caps.insert(caps.bits(), index);
        (index, true)
    }

    pub fn get(&self, index: usize) -> Option<&ShaderVariant> {
        self.shaders.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ShaderVariant> {
        self.shaders.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ShaderVariant)> {
        self.shaders.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

impl Default for ShaderCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;

    #[test]
    fn cache_shares_identical_signatures() {
        let mut cache = ShaderCache::new();
        let kinds = [LightKind::Point];
        let caps = ShaderCaps::new(true, false, false);

        let (first, created_first) = cache.lookup_or_create(caps, &kinds);
        let (second, created_second) = cache.lookup_or_create(caps, &kinds);
        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_splits_differing_signatures() {
        let mut cache = ShaderCache::new();
        let kinds = [LightKind::Point];

        let (a, _) = cache.lookup_or_create(ShaderCaps::new(false, false, false), &kinds);
        let (b, _) = cache.lookup_or_create(ShaderCaps::new(true, false, false), &kinds);
        let (c, _) = cache.lookup_or_create(ShaderCaps::new(true, false, true), &kinds);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn pass_participation_follows_registered_materials() {
        let mut shader = ShaderVariant::new(ShaderCaps::default(), &[LightKind::Point]);
        assert!(!shader.set_blend(false));
        assert!(!shader.set_blend(true));

        shader.register_material(false);
        assert!(shader.set_blend(false));
        assert!(!shader.set_blend(true));

        shader.register_material(true);
        assert!(shader.set_blend(true));
    }

    #[test]
    fn source_unrolls_one_block_per_light() {
        let source = generate_source(
            ShaderCaps::default(),
            &[LightKind::Point, LightKind::Directional],
        );
        assert!(source.contains("frame.lights[0].position.xyz - in.eye_position"));
        assert!(source.contains("let l1 = normalize(-frame.lights[1].position.xyz);"));
        assert!(!source.contains("let l1 = normalize(frame.lights[1].position.xyz);"));
        assert!(!source.contains("frame.lights[2]."));
    }

    #[test]
    fn spot_lights_generate_the_point_formula() {
        let source = generate_source(ShaderCaps::default(), &[LightKind::Spot]);
        assert!(source.contains("frame.lights[0].position.xyz - in.eye_position"));
    }

    #[test]
    fn texture_bindings_follow_caps() {
        let plain = generate_source(ShaderCaps::default(), &[LightKind::Point]);
        assert!(!plain.contains("diffuse_texture"));
        assert!(!plain.contains("@location(2) uv"));

        let textured = generate_source(ShaderCaps::new(true, true, false), &[LightKind::Point]);
        assert!(textured.contains("var diffuse_texture: texture_2d<f32>"));
        assert!(textured.contains("var specular_texture: texture_2d<f32>"));
        assert!(textured.contains("@location(2) uv: vec2<f32>"));

        let mirrored = generate_source(ShaderCaps::new(false, false, true), &[LightKind::Point]);
        assert!(mirrored.contains("var env_texture: texture_cube<f32>"));
        assert!(mirrored.contains("mix(color, env_color"));
        // Env mapping alone does not pull in the UV attribute.
        assert!(!mirrored.contains("@location(2) uv"));
    }

    #[test]
    fn uv_attribute_activity_matches_caps() {
        let plain = ShaderVariant::new(ShaderCaps::default(), &[]);
        assert!(!plain.uses_uv());
        let textured = ShaderVariant::new(ShaderCaps::new(true, false, false), &[]);
        assert!(textured.uses_uv());
    }

    #[test]
    fn node_uniform_carries_inverse_transpose_normal_matrix() {
        let modelview = Matrix4::from_nonuniform_scale(2.0, 1.0, 1.0);
        let uniform = NodeUniform::from_modelview(&modelview);
        // Inverse transpose of a scale matrix is the reciprocal scale.
        assert!((uniform.normal[0][0] - 0.5).abs() < 1e-6);
        assert!((uniform.normal[1][1] - 1.0).abs() < 1e-6);
        assert_eq!(uniform.modelview[0][0], 2.0);
    }

    #[test]
    fn translation_keeps_identity_normal_matrix() {
        let modelview = Matrix4::from_translation(Vector3::new(3.0, 4.0, 5.0));
        let uniform = NodeUniform::from_modelview(&modelview);
        assert!((uniform.normal[0][0] - 1.0).abs() < 1e-6);
        assert!((uniform.normal[0][1]).abs() < 1e-6);
    }

    #[test]
    fn frame_layout_constants_agree() {
        assert_eq!(FRAME_UNIFORMS_SIZE, 336);
        assert_eq!(OFFSET_LIGHTS + 4 * LIGHT_STRIDE + 48, FRAME_UNIFORMS_SIZE);
        assert_eq!(std::mem::size_of::<NodeUniform>(), 112);
    }
}
