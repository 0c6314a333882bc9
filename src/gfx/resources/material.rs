//! Phong material definitions with GPU resource handling.
//!
//! A material's texture and environment flags form its capability
//! signature; materials with the same signature share one shader variant.
//! GPU resources are created lazily, once, when the scene is handed to a
//! renderer, and the CPU-side images are freed after upload.

use wgpu::Device;

use crate::wgpu_utils::{
    binding_builder::{BindGroupBuilder, BindGroupLayoutWithDesc},
    uniform_buffer::UniformBuffer,
};

use super::texture_resource::{TextureImage, TextureResource};

/// Capability signature of a material, the shader cache key.
///
/// Two materials map to the same shader exactly when their bitmasks are
/// equal. Transparency is deliberately not part of the signature; one
/// shader serves both blend passes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct ShaderCaps(u8);

impl ShaderCaps {
    pub const DIFFUSE_TEXTURE: u8 = 1 << 0;
    pub const SPECULAR_TEXTURE: u8 = 1 << 1;
    pub const ENV_MAP: u8 = 1 << 2;

    pub fn new(diffuse_texture: bool, specular_texture: bool, env_map: bool) -> Self {
        let mut bits = 0;
        if diffuse_texture {
            bits |= Self::DIFFUSE_TEXTURE;
        }
        if specular_texture {
            bits |= Self::SPECULAR_TEXTURE;
        }
        if env_map {
            bits |= Self::ENV_MAP;
        }
        ShaderCaps(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn has_diffuse_texture(self) -> bool {
        self.0 & Self::DIFFUSE_TEXTURE != 0
    }

    pub fn has_specular_texture(self) -> bool {
        self.0 & Self::SPECULAR_TEXTURE != 0
    }

    pub fn has_env_map(self) -> bool {
        self.0 & Self::ENV_MAP != 0
    }

    /// Whether shaders with these caps consume the UV attribute.
    pub fn uses_uv(self) -> bool {
        self.has_diffuse_texture() || self.has_specular_texture()
    }
}

/// GPU uniform data for materials
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    /// ka in rgb, w unused
    pub ambient: [f32; 4],
    /// kd in rgb, material opacity in w
    pub diffuse: [f32; 4],
    /// ks in rgb, w unused
    pub specular: [f32; 4],
    /// shininess in x, env reflectivity in y
    pub params: [f32; 4],
}

type MaterialUBO = UniformBuffer<MaterialUniform>;

struct MaterialGpu {
    ubo: MaterialUBO,
    bind_group: wgpu::BindGroup,
    // Keep the textures alive for the bind group's lifetime.
    _diffuse_texture: Option<TextureResource>,
    _specular_texture: Option<TextureResource>,
}

/// Material definition with Phong properties
///
/// `diffuse_image` and `specular_image` hold decoded texture data between
/// loading and GPU upload; [`Material::init_gpu`] consumes them.
pub struct Material {
    pub name: String,
    pub transparent: bool,
    pub opacity: f32,
    pub ambient: [f32; 3],
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: f32,
    pub env_map: bool,
    pub reflectivity: f32,
    pub diffuse_image: Option<TextureImage>,
    pub specular_image: Option<TextureImage>,

    caps: ShaderCaps,
    gpu: Option<MaterialGpu>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            transparent: false,
            opacity: 1.0,
            ambient: [0.2, 0.2, 0.2],
            diffuse: [0.8, 0.8, 0.8],
            specular: [0.2, 0.2, 0.2],
            shininess: 32.0,
            env_map: false,
            reflectivity: 0.0,
            diffuse_image: None,
            specular_image: None,
            caps: ShaderCaps::default(),
            gpu: None,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Builder pattern: Set the Phong reflectances and shininess
    pub fn with_phong(
        mut self,
        ambient: [f32; 3],
        diffuse: [f32; 3],
        specular: [f32; 3],
        shininess: f32,
    ) -> Self {
        self.ambient = ambient;
        self.diffuse = diffuse;
        self.specular = specular;
        self.shininess = shininess;
        self
    }

    /// Builder pattern: Set opacity; anything below 1 makes the material
    /// transparent
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self.transparent = self.opacity < 1.0;
        self
    }

    pub fn with_diffuse_image(mut self, image: TextureImage) -> Self {
        self.diffuse_image = Some(image);
        self
    }

    pub fn with_specular_image(mut self, image: TextureImage) -> Self {
        self.specular_image = Some(image);
        self
    }

    /// Builder pattern: Participate in the environment map with the given
    /// reflectivity
    pub fn with_env_map(mut self, reflectivity: f32) -> Self {
        self.env_map = true;
        self.reflectivity = reflectivity.clamp(0.0, 1.0);
        self
    }

    /// Fixes the capability signature for this scene. Environment mapping
    /// is only active when both the material asks for it and the scene
    /// actually carries a cubemap.
    pub fn resolve_caps(&mut self, scene_has_env: bool) -> ShaderCaps {
        self.caps = ShaderCaps::new(
            self.diffuse_image.is_some(),
            self.specular_image.is_some(),
            self.env_map && scene_has_env,
        );
        self.caps
    }

    pub fn caps(&self) -> ShaderCaps {
        self.caps
    }

    fn uniform(&self) -> MaterialUniform {
        MaterialUniform {
            ambient: [self.ambient[0], self.ambient[1], self.ambient[2], 0.0],
            diffuse: [
                self.diffuse[0],
                self.diffuse[1],
                self.diffuse[2],
                self.opacity,
            ],
            specular: [self.specular[0], self.specular[1], self.specular[2], 0.0],
            params: [self.shininess, self.reflectivity, 0.0, 0.0],
        }
    }

    /// Creates the uniform buffer, uploads any textures, and builds the
    /// bind group against the owning shader's material layout. Runs once;
    /// later calls are no-ops. The CPU-side images are dropped after
    /// upload.
    pub fn init_gpu(
        &mut self,
        device: &Device,
        queue: &wgpu::Queue,
        layout: &BindGroupLayoutWithDesc,
        environment: Option<&TextureResource>,
    ) {
        if self.gpu.is_some() {
            return;
        }

        let diffuse_texture = self.diffuse_image.take().map(|image| {
            TextureResource::create_from_image(
                device,
                queue,
                &image,
                &format!("{} Diffuse", self.name),
                wgpu::AddressMode::Repeat,
            )
        });
        let specular_texture = self.specular_image.take().map(|image| {
            TextureResource::create_from_image(
                device,
                queue,
                &image,
                &format!("{} Specular", self.name),
                wgpu::AddressMode::Repeat,
            )
        });

        let ubo = MaterialUBO::new_with_data(device, &self.uniform());

        let mut builder = BindGroupBuilder::new(layout).resource(ubo.binding_resource());
        if let Some(texture) = &diffuse_texture {
            builder = builder.texture(&texture.view).sampler(&texture.sampler);
        }
        if let Some(texture) = &specular_texture {
            builder = builder.texture(&texture.view).sampler(&texture.sampler);
        }
        if self.caps.has_env_map() {
            if let Some(env) = environment {
                builder = builder.texture(&env.view).sampler(&env.sampler);
            }
        }
        let bind_group = builder.create(device, &format!("{} Material Bind Group", self.name));

        self.gpu = Some(MaterialGpu {
            ubo,
            bind_group,
            _diffuse_texture: diffuse_texture,
            _specular_texture: specular_texture,
        });
    }

    /// Re-uploads the uniform block after a property change.
    pub fn update_gpu(&mut self, queue: &wgpu::Queue) {
        let uniform = self.uniform();
        if let Some(gpu) = &mut self.gpu {
            gpu.ubo.update_content(queue, uniform);
        }
    }

    /// Gets the bind group for rendering
    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.gpu.as_ref().map(|gpu| &gpu.bind_group)
    }
}
