//! Graphics core: merged scene geometry, the node graph, materials and
//! their generated shader variants, and the frame renderer.

pub mod geometry;
pub mod rendering;
pub mod resources;
pub mod scene;
