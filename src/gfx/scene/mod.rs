//! # Scene Management Module
//!
//! Holds the reference-counted scene graph and the GPU vertex layouts for
//! the shared scene buffers.
//!
//! ## Key Components
//!
//! - [`SceneGraph`] - Arena-backed tree of transform nodes with render leaves
//! - [`TransformNode`] / [`RenderNode`] - Interior and leaf node types
//! - [`SceneVertex`] / [`UvCoord`] - Vertex layouts for the two buffer regions

pub mod graph;
pub mod vertex;

// Re-export main types
pub use graph::{NodeId, RenderNode, RenderNodeId, SceneGraph, TransformNode};
pub use vertex::{SceneVertex, UvCoord};
