//! GPU resource management
//!
//! Materials, lights, and texture resources shared across the scene.

pub mod light;
pub mod material;
pub mod texture_resource;

// Re-export main types
pub use light::{Light, LightKind, MAX_LIGHTS};
pub use material::{Material, ShaderCaps};
pub use texture_resource::{TextureImage, TextureResource};
