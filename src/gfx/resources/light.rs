//! Scene lights and their per-frame eye-space placement.

use cgmath::{InnerSpace, Matrix4, Vector3, Vector4};

use crate::gfx::scene::NodeId;

/// Lights that can participate in shading at once. Extra lights are
/// ignored with a warning.
pub const MAX_LIGHTS: usize = 5;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LightKind {
    Point,
    Directional,
    Spot,
}

impl LightKind {
    /// Spot lights shade as point lights (no cone cutoff).
    pub fn shading_kind(self) -> LightKind {
        match self {
            LightKind::Spot => LightKind::Point,
            other => other,
        }
    }
}

/// A light anchored to a transform node in the scene graph.
///
/// `position` is the local position for point and spot lights, the local
/// direction for directional ones. The anchor node's world matrix carries
/// the light into eye space each frame.
#[derive(Clone, Debug)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub position: Vector3<f32>,
    pub diffuse: Vector3<f32>,
    pub specular: Vector3<f32>,
    pub node: NodeId,
}

impl Light {
    /// Eye-space position (point, spot) or normalized direction
    /// (directional) under the anchor node's modelview matrix.
    pub fn eye_space_position(&self, modelview: &Matrix4<f32>) -> Vector3<f32> {
        match self.kind.shading_kind() {
            LightKind::Point => {
                (modelview * Vector4::new(self.position.x, self.position.y, self.position.z, 1.0))
                    .truncate()
            }
            _ => {
                let tip = modelview
                    * Vector4::new(self.position.x, self.position.y, self.position.z, 1.0);
                let origin = modelview * Vector4::new(0.0, 0.0, 0.0, 1.0);
                (tip - origin).truncate().normalize()
            }
        }
    }
}
