//! Error types for scene construction and geometry validation.

use thiserror::Error;

/// Errors raised while validating or merging model geometry.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("vertex array holds {0} floats, expected a non-empty multiple of 6")]
    MalformedVertices(usize),

    #[error("index array holds {0} entries, expected a non-empty multiple of 3")]
    MalformedIndices(usize),

    #[error("uv array holds {got} floats, expected {expected}")]
    MalformedUvs { got: usize, expected: usize },

    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u16, vertex_count: usize },

    #[error("triangle starting at index {0} repeats a corner")]
    DegenerateTriangle(usize),

    #[error("mesh range {0} reaches past the end of the index array")]
    MalformedMeshRange(usize),

    #[error("merged scene would hold {0} vertices, 16-bit indices allow at most 65535")]
    TooManyVertices(usize),
}

/// Errors raised while resolving names against the scene graph.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("no node named `{0}` in the scene")]
    NodeNotFound(String),

    #[error("node name `{0}` matches more than one node")]
    AmbiguousNode(String),
}
