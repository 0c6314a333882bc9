//! Arena-backed scene graph with reference-counted shared nodes.
//!
//! Transform nodes form the tree; render nodes hang off them as leaves.
//! A node may be the child of more than one parent (a light anchor that is
//! also a regular child, for instance), so each arena slot carries a
//! reference count and a node is destroyed when its last parent lets go.
//! Generational indices keep stale handles harmless.

use cgmath::{Matrix4, SquareMatrix};
use generational_arena::{Arena, Index};

use crate::error::SceneError;
use crate::gfx::geometry::MeshRange;

/// Stable handle to a transform node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(Index);

/// Stable handle to a render node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RenderNodeId(Index);

/// Interior node: a named local transform with child lists.
///
/// `world` is the node's modelview matrix, recomputed top-down once per
/// frame. The animation matrix, when bound, applies after the local
/// transform.
pub struct TransformNode {
    pub name: String,
    pub transform: Matrix4<f32>,
    pub animation: Option<Matrix4<f32>>,
    pub visible: bool,
    pub world: Matrix4<f32>,
    pub children: Vec<NodeId>,
    pub render_children: Vec<RenderNodeId>,
}

impl TransformNode {
    pub fn new(name: &str, transform: Matrix4<f32>) -> Self {
        Self {
            name: name.to_string(),
            transform,
            animation: None,
            visible: true,
            world: Matrix4::identity(),
            children: Vec::new(),
            render_children: Vec::new(),
        }
    }
}

/// Leaf node: one mesh range drawn with one material.
pub struct RenderNode {
    pub mesh: MeshRange,
    pub material: usize,
    pub visible: bool,
}

impl RenderNode {
    pub fn new(mesh: MeshRange, material: usize) -> Self {
        Self {
            mesh,
            material,
            visible: true,
        }
    }
}

struct TransformSlot {
    refs: u32,
    node: TransformNode,
}

struct RenderSlot {
    refs: u32,
    node: RenderNode,
}

pub struct SceneGraph {
    transforms: Arena<TransformSlot>,
    renders: Arena<RenderSlot>,
    root: NodeId,
}

impl SceneGraph {
    /// Creates a graph holding only the root node, named "view". The graph
    /// itself owns one reference to the root.
    pub fn new() -> Self {
        let mut transforms = Arena::new();
        let root = NodeId(transforms.insert(TransformSlot {
            refs: 1,
            node: TransformNode::new("view", Matrix4::identity()),
        }));
        Self {
            transforms,
            renders: Arena::new(),
            root,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Inserts an unattached transform node. Its reference count starts at
    /// zero; attach it with [`add_child`](Self::add_child).
    pub fn insert_transform(&mut self, node: TransformNode) -> NodeId {
        NodeId(self.transforms.insert(TransformSlot { refs: 0, node }))
    }

    /// Inserts an unattached render node.
    pub fn insert_render(&mut self, node: RenderNode) -> RenderNodeId {
        RenderNodeId(self.renders.insert(RenderSlot { refs: 0, node }))
    }

    pub fn transform(&self, id: NodeId) -> Option<&TransformNode> {
        self.transforms.get(id.0).map(|slot| &slot.node)
    }

    pub fn transform_mut(&mut self, id: NodeId) -> Option<&mut TransformNode> {
        self.transforms.get_mut(id.0).map(|slot| &mut slot.node)
    }

    pub fn render(&self, id: RenderNodeId) -> Option<&RenderNode> {
        self.renders.get(id.0).map(|slot| &slot.node)
    }

    pub fn render_mut(&mut self, id: RenderNodeId) -> Option<&mut RenderNode> {
        self.renders.get_mut(id.0).map(|slot| &mut slot.node)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.transforms.contains(id.0)
    }

    pub fn contains_render(&self, id: RenderNodeId) -> bool {
        self.renders.contains(id.0)
    }

    /// Reference count of a transform node, for bookkeeping checks.
    pub fn refs(&self, id: NodeId) -> Option<u32> {
        self.transforms.get(id.0).map(|slot| slot.refs)
    }

    pub fn render_refs(&self, id: RenderNodeId) -> Option<u32> {
        self.renders.get(id.0).map(|slot| slot.refs)
    }

    /// Handles of every live transform node, root included.
    pub fn transform_ids(&self) -> Vec<NodeId> {
        self.transforms.iter().map(|(idx, _)| NodeId(idx)).collect()
    }

    /// Appends `child` to `parent`'s child list and takes a reference on it.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert_ne!(parent, child);
        if !self.transforms.contains(child.0) {
            return;
        }
        match self.transforms.get_mut(parent.0) {
            Some(slot) => slot.node.children.push(child),
            None => return,
        }
        if let Some(slot) = self.transforms.get_mut(child.0) {
            slot.refs += 1;
        }
    }

    /// Appends a render node to `parent` and takes a reference on it.
    pub fn add_render_child(&mut self, parent: NodeId, child: RenderNodeId) {
        if !self.renders.contains(child.0) {
            return;
        }
        match self.transforms.get_mut(parent.0) {
            Some(slot) => slot.node.render_children.push(child),
            None => return,
        }
        if let Some(slot) = self.renders.get_mut(child.0) {
            slot.refs += 1;
        }
    }

    /// Detaches the first occurrence of `child` under `parent` and releases
    /// the reference, destroying the child subtree if that was the last one.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        let removed = match self.transforms.get_mut(parent.0) {
            Some(slot) => {
                if let Some(pos) = slot.node.children.iter().position(|&c| c == child) {
                    slot.node.children.remove(pos);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if removed {
            self.release(child);
        }
    }

    pub fn remove_render_child(&mut self, parent: NodeId, child: RenderNodeId) {
        let removed = match self.transforms.get_mut(parent.0) {
            Some(slot) => {
                if let Some(pos) = slot.node.render_children.iter().position(|&c| c == child) {
                    slot.node.render_children.remove(pos);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if removed {
            self.release_render(child);
        }
    }

    /// Drops one reference; at zero the node is destroyed and its own
    /// children released the same way.
    pub fn release(&mut self, id: NodeId) {
        let destroy = match self.transforms.get_mut(id.0) {
            Some(slot) => {
                debug_assert!(slot.refs > 0, "refcount underflow");
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        };
        if destroy {
            if let Some(slot) = self.transforms.remove(id.0) {
                for child in slot.node.children {
                    self.release(child);
                }
                for child in slot.node.render_children {
                    self.release_render(child);
                }
            }
        }
    }

    pub fn release_render(&mut self, id: RenderNodeId) {
        let destroy = match self.renders.get_mut(id.0) {
            Some(slot) => {
                debug_assert!(slot.refs > 0, "refcount underflow");
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        };
        if destroy {
            self.renders.remove(id.0);
        }
    }

    pub fn set_local_transform(&mut self, id: NodeId, transform: Matrix4<f32>) {
        if let Some(node) = self.transform_mut(id) {
            node.transform = transform;
        }
    }

    /// Installs or clears the per-frame animation matrix of a node.
    pub fn set_animation(&mut self, id: NodeId, animation: Option<Matrix4<f32>>) {
        if let Some(node) = self.transform_mut(id) {
            node.animation = animation;
        }
    }

    /// Recomputes every reachable node's world matrix, top-down:
    /// `world = parent_world * local * animation`.
    pub fn update_world_matrices(&mut self) {
        let mut stack = vec![(self.root, Matrix4::identity())];
        while let Some((id, parent_world)) = stack.pop() {
            let (children, world) = match self.transforms.get_mut(id.0) {
                Some(slot) => {
                    let node = &mut slot.node;
                    let mut world = parent_world * node.transform;
                    if let Some(animation) = node.animation {
                        world = world * animation;
                    }
                    node.world = world;
                    (node.children.clone(), world)
                }
                None => continue,
            };
            for child in children {
                stack.push((child, world));
            }
        }
    }

    /// Resolves a node name to a handle, once, for animation driving.
    ///
    /// Fails when the name is absent from the tree or matches more than
    /// one reachable node; a silent first-match would bind the wrong node
    /// half the time.
    pub fn bind_animation(&self, name: &str) -> Result<NodeId, SceneError> {
        let mut matches: Vec<NodeId> = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.transform(id) {
                // A shared child is reachable through several parents but
                // is still one node.
                if node.name == name && !matches.contains(&id) {
                    matches.push(id);
                }
                stack.extend(node.children.iter().copied());
            }
        }
        match matches.len() {
            0 => Err(SceneError::NodeNotFound(name.to_string())),
            1 => Ok(matches[0]),
            _ => Err(SceneError::AmbiguousNode(name.to_string())),
        }
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::geometry::MeshKind;
    use cgmath::Vector3;

    fn node(name: &str) -> TransformNode {
        TransformNode::new(name, Matrix4::identity())
    }

    fn mesh() -> MeshRange {
        MeshRange {
            kind: MeshKind::Normal,
            index_offset: 0,
            index_count: 3,
        }
    }

    #[test]
    fn attach_and_detach_destroys_at_zero() {
        let mut graph = SceneGraph::new();
        let child = graph.insert_transform(node("a"));
        assert_eq!(graph.refs(child), Some(0));

        graph.add_child(graph.root(), child);
        assert_eq!(graph.refs(child), Some(1));

        graph.remove_child(graph.root(), child);
        assert!(!graph.contains(child));
    }

    #[test]
    fn shared_child_survives_first_detach() {
        let mut graph = SceneGraph::new();
        let a = graph.insert_transform(node("a"));
        let b = graph.insert_transform(node("b"));
        let shared = graph.insert_transform(node("shared"));
        graph.add_child(graph.root(), a);
        graph.add_child(graph.root(), b);
        graph.add_child(a, shared);
        graph.add_child(b, shared);
        assert_eq!(graph.refs(shared), Some(2));

        graph.remove_child(a, shared);
        assert!(graph.contains(shared));
        assert_eq!(graph.refs(shared), Some(1));

        graph.remove_child(b, shared);
        assert!(!graph.contains(shared));
    }

    #[test]
    fn destroying_a_subtree_releases_descendants() {
        let mut graph = SceneGraph::new();
        let parent = graph.insert_transform(node("parent"));
        let child = graph.insert_transform(node("child"));
        let leaf = graph.insert_render(RenderNode::new(mesh(), 0));
        graph.add_child(graph.root(), parent);
        graph.add_child(parent, child);
        graph.add_render_child(child, leaf);

        graph.remove_child(graph.root(), parent);
        assert!(!graph.contains(parent));
        assert!(!graph.contains(child));
        assert!(!graph.contains_render(leaf));
    }

    #[test]
    fn removing_an_unrelated_child_is_a_no_op() {
        let mut graph = SceneGraph::new();
        let a = graph.insert_transform(node("a"));
        let b = graph.insert_transform(node("b"));
        graph.add_child(graph.root(), a);
        graph.add_child(graph.root(), b);

        graph.remove_child(a, b);
        assert!(graph.contains(b));
        assert_eq!(graph.refs(b), Some(1));
    }

    #[test]
    fn stale_handles_are_harmless() {
        let mut graph = SceneGraph::new();
        let a = graph.insert_transform(node("a"));
        graph.add_child(graph.root(), a);
        graph.remove_child(graph.root(), a);

        assert!(graph.transform(a).is_none());
        graph.release(a);
        graph.set_local_transform(a, Matrix4::identity());
    }

    #[test]
    fn world_matrices_compose_parent_local_animation() {
        let mut graph = SceneGraph::new();
        let parent = graph.insert_transform(TransformNode::new(
            "parent",
            Matrix4::from_translation(Vector3::new(1.0, 0.0, 0.0)),
        ));
        let child = graph.insert_transform(TransformNode::new(
            "child",
            Matrix4::from_translation(Vector3::new(0.0, 2.0, 0.0)),
        ));
        graph.add_child(graph.root(), parent);
        graph.add_child(parent, child);
        graph.set_animation(
            child,
            Some(Matrix4::from_translation(Vector3::new(0.0, 0.0, 3.0))),
        );

        graph.update_world_matrices();
        let world = graph.transform(child).unwrap().world;
        assert_eq!(
            world,
            Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0))
        );
    }

    #[test]
    fn bind_animation_resolves_unique_names() {
        let mut graph = SceneGraph::new();
        let arm = graph.insert_transform(node("arm"));
        graph.add_child(graph.root(), arm);

        assert_eq!(graph.bind_animation("arm").unwrap(), arm);
    }

    #[test]
    fn bind_animation_rejects_missing_and_ambiguous_names() {
        let mut graph = SceneGraph::new();
        let a = graph.insert_transform(node("arm"));
        let b = graph.insert_transform(node("arm"));
        graph.add_child(graph.root(), a);
        graph.add_child(graph.root(), b);

        assert!(matches!(
            graph.bind_animation("leg"),
            Err(SceneError::NodeNotFound(_))
        ));
        assert!(matches!(
            graph.bind_animation("arm"),
            Err(SceneError::AmbiguousNode(_))
        ));
    }

    #[test]
    fn shared_child_binds_as_one_node() {
        let mut graph = SceneGraph::new();
        let a = graph.insert_transform(node("a"));
        let b = graph.insert_transform(node("b"));
        let shared = graph.insert_transform(node("shared"));
        graph.add_child(graph.root(), a);
        graph.add_child(graph.root(), b);
        graph.add_child(a, shared);
        graph.add_child(b, shared);

        assert_eq!(graph.bind_animation("shared").unwrap(), shared);
    }

    #[test]
    fn unattached_nodes_are_not_reachable_by_name() {
        let mut graph = SceneGraph::new();
        graph.insert_transform(node("floating"));
        assert!(matches!(
            graph.bind_animation("floating"),
            Err(SceneError::NodeNotFound(_))
        ));
    }
}
