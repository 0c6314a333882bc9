//! Per-frame render state with consolidated dirty tracking.
//!
//! Every settable field has a dirty bit in one `u32` mask. Setters
//! compare-and-set, so writing an unchanged value uploads nothing. The
//! renderer clears the whole mask exactly once per frame, after all shader
//! uniform uploads.

use cgmath::{Matrix4, SquareMatrix, Vector3};

use crate::gfx::resources::light::{Light, MAX_LIGHTS};

/// Dirty bit for the projection matrix.
pub const DIRTY_PROJECTION: u32 = 1 << 0;
/// Dirty bit for the global opacity.
pub const DIRTY_OPACITY: u32 = 1 << 1;
/// Dirty bit for the ambient light color.
pub const DIRTY_AMBIENT: u32 = 1 << 2;
/// Dirty bit for the environment blend alpha.
pub const DIRTY_ENV_ALPHA: u32 = 1 << 3;

const LIGHT_BITS_BASE: u32 = 8;
const LIGHT_BITS_PER_SLOT: u32 = 3;

/// Dirty bit for light `i`'s eye-space position.
pub fn dirty_light_position(i: usize) -> u32 {
    1 << (LIGHT_BITS_BASE + i as u32 * LIGHT_BITS_PER_SLOT)
}

/// Dirty bit for light `i`'s diffuse color.
pub fn dirty_light_diffuse(i: usize) -> u32 {
    1 << (LIGHT_BITS_BASE + i as u32 * LIGHT_BITS_PER_SLOT + 1)
}

/// Dirty bit for light `i`'s specular color.
pub fn dirty_light_specular(i: usize) -> u32 {
    1 << (LIGHT_BITS_BASE + i as u32 * LIGHT_BITS_PER_SLOT + 2)
}

/// A light plus its most recent eye-space placement.
pub struct LightSlot {
    pub light: Light,
    pub final_position: Vector3<f32>,
}

pub struct RenderState {
    projection: Matrix4<f32>,
    opacity: f32,
    ambient: Vector3<f32>,
    env_alpha: f32,
    visible: bool,
    lights: Vec<LightSlot>,
    dirty: u32,
}

impl RenderState {
    /// Starts fully dirty so the first frame uploads everything.
    pub fn new(lights: Vec<Light>) -> Self {
        debug_assert!(lights.len() <= MAX_LIGHTS);
        let mut state = Self {
            projection: Matrix4::identity(),
            opacity: 1.0,
            ambient: Vector3::new(0.2, 0.2, 0.2),
            env_alpha: 1.0,
            visible: true,
            lights: lights
                .into_iter()
                .map(|light| LightSlot {
                    light,
                    final_position: Vector3::new(0.0, 0.0, 0.0),
                })
                .collect(),
            dirty: 0,
        };
        state.set_dirty();
        state
    }

    pub fn projection(&self) -> &Matrix4<f32> {
        &self.projection
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn ambient(&self) -> Vector3<f32> {
        self.ambient
    }

    pub fn env_alpha(&self) -> f32 {
        self.env_alpha
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn lights(&self) -> &[LightSlot] {
        &self.lights
    }

    pub fn dirty(&self) -> u32 {
        self.dirty
    }

    pub fn is_dirty(&self, bit: u32) -> bool {
        self.dirty & bit != 0
    }

    /// Every defined bit for the current light count.
    fn full_mask(&self) -> u32 {
        let mut mask = DIRTY_PROJECTION | DIRTY_OPACITY | DIRTY_AMBIENT | DIRTY_ENV_ALPHA;
        for i in 0..self.lights.len() {
            mask |= dirty_light_position(i) | dirty_light_diffuse(i) | dirty_light_specular(i);
        }
        mask
    }

    /// Marks every field for re-upload.
    pub fn set_dirty(&mut self) {
        self.dirty = self.full_mask();
    }

    /// Clears all dirty bits; called once after a completed frame.
    pub fn reset_dirty(&mut self) {
        self.dirty = 0;
    }

    pub fn set_projection(&mut self, projection: Matrix4<f32>) {
        if self.projection != projection {
            self.projection = projection;
            self.dirty |= DIRTY_PROJECTION;
        }
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        if self.opacity != opacity {
            self.opacity = opacity;
            self.dirty |= DIRTY_OPACITY;
        }
    }

    pub fn set_ambient(&mut self, ambient: Vector3<f32>) {
        if self.ambient != ambient {
            self.ambient = ambient;
            self.dirty |= DIRTY_AMBIENT;
        }
    }

    pub fn set_env_alpha(&mut self, alpha: f32) {
        if self.env_alpha != alpha {
            self.env_alpha = alpha;
            self.dirty |= DIRTY_ENV_ALPHA;
        }
    }

    /// Visibility is a draw gate, not a uniform; it carries no dirty bit.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Updates a light's local position; the change reaches the GPU when
    /// the next frame derives the eye-space position.
    pub fn set_light_position(&mut self, index: usize, position: Vector3<f32>) {
        if let Some(slot) = self.lights.get_mut(index) {
            slot.light.position = position;
        }
    }

    pub fn set_light_final_position(&mut self, index: usize, position: Vector3<f32>) {
        if let Some(slot) = self.lights.get_mut(index) {
            if slot.final_position != position {
                slot.final_position = position;
                self.dirty |= dirty_light_position(index);
            }
        }
    }

    pub fn set_light_diffuse(&mut self, index: usize, diffuse: Vector3<f32>) {
        if let Some(slot) = self.lights.get_mut(index) {
            if slot.light.diffuse != diffuse {
                slot.light.diffuse = diffuse;
                self.dirty |= dirty_light_diffuse(index);
            }
        }
    }

    pub fn set_light_specular(&mut self, index: usize, specular: Vector3<f32>) {
        if let Some(slot) = self.lights.get_mut(index) {
            if slot.light.specular != specular {
                slot.light.specular = specular;
                self.dirty |= dirty_light_specular(index);
            }
        }
    }

    /// Slot index of a light by name, for host-side colour and position
    /// updates.
    pub fn light_index(&self, name: &str) -> Option<usize> {
        self.lights.iter().position(|slot| slot.light.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::resources::light::LightKind;
    use crate::gfx::scene::SceneGraph;

    fn state_with_lights(count: usize) -> RenderState {
        let graph = SceneGraph::new();
        let lights = (0..count)
            .map(|i| Light {
                name: format!("light{}", i),
                kind: LightKind::Point,
                position: Vector3::new(0.0, 0.0, 0.0),
                diffuse: Vector3::new(1.0, 1.0, 1.0),
                specular: Vector3::new(1.0, 1.0, 1.0),
                node: graph.root(),
            })
            .collect();
        RenderState::new(lights)
    }

    #[test]
    fn starts_fully_dirty_and_reset_clears_everything() {
        let mut state = state_with_lights(2);
        assert!(state.is_dirty(DIRTY_PROJECTION));
        assert!(state.is_dirty(dirty_light_specular(1)));

        state.reset_dirty();
        assert_eq!(state.dirty(), 0);
        // Idempotent.
        state.reset_dirty();
        assert_eq!(state.dirty(), 0);

        state.set_dirty();
        assert!(state.is_dirty(DIRTY_OPACITY));
        assert!(state.is_dirty(dirty_light_position(0)));
    }

    #[test]
    fn writing_an_equal_value_does_not_dirty() {
        let mut state = state_with_lights(1);
        state.reset_dirty();

        state.set_opacity(1.0);
        state.set_ambient(Vector3::new(0.2, 0.2, 0.2));
        state.set_light_diffuse(0, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(state.dirty(), 0);

        state.set_opacity(0.5);
        assert_eq!(state.dirty(), DIRTY_OPACITY);
    }

    #[test]
    fn light_fields_dirty_their_own_bits_only() {
        let mut state = state_with_lights(2);
        state.reset_dirty();

        state.set_light_final_position(1, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(state.dirty(), dirty_light_position(1));

        state.set_light_specular(0, Vector3::new(0.5, 0.5, 0.5));
        assert_eq!(
            state.dirty(),
            dirty_light_position(1) | dirty_light_specular(0)
        );
    }

    #[test]
    fn local_light_position_changes_do_not_dirty_uniforms() {
        let mut state = state_with_lights(1);
        state.reset_dirty();
        state.set_light_position(0, Vector3::new(5.0, 0.0, 0.0));
        assert_eq!(state.dirty(), 0);
        assert_eq!(
            state.lights()[0].light.position,
            Vector3::new(5.0, 0.0, 0.0)
        );
    }

    #[test]
    fn light_lookup_by_name() {
        let state = state_with_lights(3);
        assert_eq!(state.light_index("light2"), Some(2));
        assert_eq!(state.light_index("nope"), None);
    }
}
