//! Sheen renders loaded 3D models into a host application's wgpu surface.
//!
//! The host owns the device, the surface, and the frame loop; sheen owns a
//! reference-counted scene graph, shared vertex/index buffers for every
//! loaded model, and a cache of generated shader variants keyed by material
//! capabilities. Per-frame uploads are driven by dirty flags, so an idle
//! scene costs a single render pass and nothing else.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sheen::loader::{load_obj, SceneBuilder};
//! use sheen::{Renderer, Viewport};
//!
//! fn build(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> anyhow::Result<Renderer> {
//!     let mut builder = SceneBuilder::new();
//!     builder.add_model(load_obj("model.obj")?)?;
//!     let mut renderer = Renderer::new(
//!         device,
//!         queue,
//!         builder.finish(),
//!         wgpu::TextureFormat::Bgra8UnormSrgb,
//!     );
//!     renderer.set_viewport(Viewport { x: 0.0, y: 0.0, width: 800.0, height: 600.0 });
//!     Ok(renderer)
//! }
//! ```

pub mod error;
pub mod gfx;
pub mod loader;
pub mod wgpu_utils;

pub use error::{GeometryError, SceneError};
pub use gfx::rendering::{Renderer, Viewport};
pub use gfx::resources::{Light, LightKind, Material, ShaderCaps};
pub use gfx::scene::{NodeId, SceneGraph};
pub use loader::{SceneBuilder, SceneBundle};
