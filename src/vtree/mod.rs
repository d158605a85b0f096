//! Virtual node tree: the planned shape of the target scene before any real
//! entity exists.
//!
//! Nodes live in an arena and refer to each other by [`VNodeId`]. Parentage is
//! a strict tree rooted at [`VTree::root`]; the `mesh_moved_to` forwarding
//! relation is kept separately and is checked to be acyclic by
//! [`VTree::validate`].

mod builder;
mod locate;

use std::{collections::HashMap, fmt, ops::Index};

use nalgebra::{Matrix4, Vector3};

use crate::{
    error::GraphError,
    host::EntityHandle,
    source::{MeshInstance, NodeId},
    transform::Trs,
};

pub use builder::build_vtree;
pub use locate::{find_mesh_instances, find_node_mesh_instances};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VNodeId(pub usize);

impl fmt::Display for VNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Leaf data instantiated by an object vnode.
#[derive(Debug, Clone, PartialEq)]
pub enum Instance {
    Mesh(MeshInstance),
    Camera(usize),
    Light(usize),
}

/// Skeletal data of a joint vnode.
#[derive(Debug, Clone, PartialEq)]
pub struct JointData {
    /// Armature vnode owning the joint; always a strict ancestor.
    pub armature: VNodeId,
    /// Rest transform in armature space, with any non-uniform scale removed.
    pub local_to_armature: Matrix4<f32>,
    pub bone_length: f32,
    /// Scale reapplied on the pose bone because the rest pose cannot hold it.
    pub pose_scale_override: Option<Vector3<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VNodeKind {
    /// Plain transform node, optionally instancing a mesh, camera or light.
    Object,
    Armature,
    Joint(JointData),
    /// Top of the tree; realized only when a wrapper object was requested.
    Root,
}

impl VNodeKind {
    pub fn is_object(&self) -> bool {
        matches!(self, VNodeKind::Object)
    }

    pub fn is_armature(&self) -> bool {
        matches!(self, VNodeKind::Armature)
    }

    pub fn is_joint(&self) -> bool {
        matches!(self, VNodeKind::Joint(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VNode {
    pub name: String,
    pub kind: VNodeKind,
    pub trs: Trs,
    pub instance: Option<Instance>,
    /// Source node this vnode was produced from; `None` for synthetic nodes.
    pub source: Option<NodeId>,
    /// Vnodes that took over the instance originally placed here.
    pub mesh_moved_to: Vec<VNodeId>,
    pub entity: Option<EntityHandle>,
    /// Unique name assigned by the host on creation.
    pub realized_name: Option<String>,
    parent: Option<VNodeId>,
    children: Vec<VNodeId>,
}

impl VNode {
    pub fn new(name: impl Into<String>, kind: VNodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            trs: Trs::identity(),
            instance: None,
            source: None,
            mesh_moved_to: Vec::new(),
            entity: None,
            realized_name: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<VNodeId> {
        self.parent
    }

    pub fn children(&self) -> &[VNodeId] {
        &self.children
    }

    pub fn mesh(&self) -> Option<&MeshInstance> {
        match &self.instance {
            Some(Instance::Mesh(mesh)) => Some(mesh),
            _ => None,
        }
    }

    pub fn joint(&self) -> Option<&JointData> {
        match &self.kind {
            VNodeKind::Joint(joint) => Some(joint),
            _ => None,
        }
    }

    pub fn is_joint(&self) -> bool {
        self.kind.is_joint()
    }
}

#[derive(Debug, Clone)]
pub struct VTree {
    nodes: Vec<VNode>,
    root: VNodeId,
    node_vnodes: HashMap<NodeId, Vec<VNodeId>>,
    skin_joints: HashMap<(usize, NodeId), VNodeId>,
}

impl Index<VNodeId> for VTree {
    type Output = VNode;

    fn index(&self, id: VNodeId) -> &VNode {
        &self.nodes[id.0]
    }
}

impl VTree {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![VNode::new(root_name, VNodeKind::Root)],
            root: VNodeId(0),
            node_vnodes: HashMap::new(),
            skin_joints: HashMap::new(),
        }
    }

    pub fn root(&self) -> VNodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: VNodeId) -> Option<&VNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: VNodeId) -> Option<&mut VNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = VNodeId> + '_ {
        (0..self.nodes.len()).map(VNodeId)
    }

    /// Every vnode a source node was turned into; the primary vnode comes first.
    pub fn vnodes_for_node(&self, node: NodeId) -> &[VNodeId] {
        self.node_vnodes
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn primary_vnode(&self, node: NodeId) -> Option<VNodeId> {
        self.vnodes_for_node(node).first().copied()
    }

    /// The joint vnode that represents `node` in the armature used by `skin`.
    pub fn joint_vnode(&self, skin: usize, node: NodeId) -> Option<VNodeId> {
        self.skin_joints.get(&(skin, node)).copied()
    }

    pub fn armature_owner(&self, id: VNodeId) -> Option<VNodeId> {
        self[id].joint().map(|joint| joint.armature)
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: VNodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self[id].parent,
        }
    }

    /// True when `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: VNodeId, id: VNodeId) -> bool {
        self.ancestors(id).any(|candidate| candidate == ancestor)
    }

    /// Pre-order listing of the tree.
    pub fn depth_first(&self) -> Vec<VNodeId> {
        self.subtree(self.root)
    }

    /// Pre-order listing of `start` and its descendants.
    pub fn subtree(&self, start: VNodeId) -> Vec<VNodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self[id].children.iter().rev().copied());
        }
        order
    }

    /// Count vnodes whose kind satisfies `kind`, e.g. [`VNodeKind::is_armature`].
    pub fn count_kind(&self, kind: fn(&VNodeKind) -> bool) -> usize {
        self.nodes.iter().filter(|node| kind(&node.kind)).count()
    }

    pub(crate) fn push(&mut self, node: VNode) -> VNodeId {
        let id = VNodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub(crate) fn node_mut(&mut self, id: VNodeId) -> &mut VNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn append_child(&mut self, parent: VNodeId, child: VNodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Put `child` in the slot `replaced` occupies under its parent, then
    /// detach `replaced`.
    pub(crate) fn replace_in_parent(&mut self, replaced: VNodeId, child: VNodeId) {
        self.detach(child);
        let Some(parent) = self.nodes[replaced.0].parent.take() else {
            return;
        };
        let siblings = &mut self.nodes[parent.0].children;
        if let Some(slot) = siblings.iter_mut().find(|sibling| **sibling == replaced) {
            *slot = child;
        }
        self.nodes[child.0].parent = Some(parent);
    }

    pub(crate) fn detach(&mut self, child: VNodeId) {
        if let Some(parent) = self.nodes[child.0].parent.take() {
            self.nodes[parent.0]
                .children
                .retain(|sibling| *sibling != child);
        }
    }

    pub(crate) fn record_node(&mut self, node: NodeId, vnode: VNodeId) {
        let entry = self.node_vnodes.entry(node).or_default();
        if !entry.contains(&vnode) {
            entry.push(vnode);
        }
    }

    pub(crate) fn record_skin_joint(&mut self, skin: usize, node: NodeId, vnode: VNodeId) {
        self.skin_joints.insert((skin, node), vnode);
    }

    /// Check the structural invariants every later stage relies on.
    pub fn validate(&self) -> Result<(), GraphError> {
        let invariant = |message: String| -> Result<(), GraphError> {
            Err(GraphError::Invariant(message))
        };

        if self[self.root].parent.is_some() {
            return invariant(format!("root {} has a parent", self.root));
        }

        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                return invariant(format!("{id} is reachable twice from the root"));
            }
            for &child in &self[id].children {
                if self[child].parent != Some(id) {
                    return invariant(format!(
                        "{child} is listed under {id} but points elsewhere"
                    ));
                }
                stack.push(child);
            }
        }
        if let Some(orphan) = seen.iter().position(|reached| !reached) {
            return invariant(format!("{} is not reachable from the root", VNodeId(orphan)));
        }

        for id in self.ids() {
            let node = &self[id];
            if let VNodeKind::Joint(joint) = &node.kind {
                let owner_kind = self.get(joint.armature).map(|owner| &owner.kind);
                if !matches!(owner_kind, Some(VNodeKind::Armature)) {
                    return invariant(format!(
                        "joint {id} is owned by non-armature {}",
                        joint.armature
                    ));
                }
                if !self.is_ancestor(joint.armature, id) {
                    return invariant(format!(
                        "joint {id} is not below its armature {}",
                        joint.armature
                    ));
                }
                if !(joint.bone_length > 0.0) {
                    return invariant(format!("joint {id} has non-positive length"));
                }
                if node.instance.is_some() {
                    return invariant(format!("joint {id} still carries an instance"));
                }
            }
            if node.kind == VNodeKind::Root && id != self.root {
                return invariant(format!("{id} is a second root"));
            }
        }

        self.check_forwarding_acyclic()
    }

    fn check_forwarding_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Active,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        for start in self.ids() {
            if marks[start.0] != Mark::Unvisited {
                continue;
            }
            // (vnode, index of next forwarding edge to follow)
            let mut stack = vec![(start, 0usize)];
            marks[start.0] = Mark::Active;
            while let Some((id, edge)) = stack.pop() {
                match self[id].mesh_moved_to.get(edge).copied() {
                    Some(next) => {
                        stack.push((id, edge + 1));
                        match marks[next.0] {
                            Mark::Active => {
                                return Err(GraphError::Invariant(format!(
                                    "mesh forwarding from {id} to {next} forms a cycle"
                                )));
                            }
                            Mark::Unvisited => {
                                marks[next.0] = Mark::Active;
                                stack.push((next, 0));
                            }
                            Mark::Done => {}
                        }
                    }
                    None => marks[id.0] = Mark::Done,
                }
            }
        }
        Ok(())
    }
}

pub struct Ancestors<'a> {
    tree: &'a VTree,
    next: Option<VNodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = VNodeId;

    fn next(&mut self) -> Option<VNodeId> {
        let current = self.next?;
        self.next = self.tree[current].parent;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (VTree, VNodeId, VNodeId) {
        let mut tree = VTree::new("root");
        let a = tree.push(VNode::new("a", VNodeKind::Object));
        let b = tree.push(VNode::new("b", VNodeKind::Object));
        tree.append_child(tree.root(), a);
        tree.append_child(a, b);
        (tree, a, b)
    }

    #[test]
    fn given_chain_when_listing_ancestors_then_nearest_comes_first() {
        let (tree, a, b) = chain();

        let ancestors: Vec<VNodeId> = tree.ancestors(b).collect();

        assert_eq!(ancestors, vec![a, tree.root()]);
        assert!(tree.is_ancestor(a, b));
        assert!(!tree.is_ancestor(b, b));
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn given_orphan_vnode_when_validating_then_invariant_error_is_reported() {
        let (mut tree, _, _) = chain();
        tree.push(VNode::new("orphan", VNodeKind::Object));

        assert!(matches!(tree.validate(), Err(GraphError::Invariant(_))));
    }

    #[test]
    fn given_forwarding_cycle_when_validating_then_cycle_is_rejected() {
        let (mut tree, a, b) = chain();
        tree.node_mut(a).mesh_moved_to.push(b);
        tree.node_mut(b).mesh_moved_to.push(a);

        let error = tree.validate().expect_err("forwarding cycle must be rejected");
        assert!(error.to_string().contains("cycle"));
    }

    #[test]
    fn given_joint_outside_armature_when_validating_then_owner_is_rejected() {
        let (mut tree, a, b) = chain();
        let armature = tree.push(VNode::new("Armature", VNodeKind::Armature));
        tree.append_child(a, armature);
        tree.node_mut(b).kind = VNodeKind::Joint(JointData {
            armature,
            local_to_armature: Matrix4::identity(),
            bone_length: 1.0,
            pose_scale_override: None,
        });

        assert!(tree.validate().is_err());
    }

    #[test]
    fn given_replacement_when_swapping_child_then_sibling_order_is_kept() {
        let mut tree = VTree::new("root");
        let first = tree.push(VNode::new("first", VNodeKind::Object));
        let second = tree.push(VNode::new("second", VNodeKind::Object));
        let wrapper = tree.push(VNode::new("wrapper", VNodeKind::Armature));
        tree.append_child(tree.root(), first);
        tree.append_child(tree.root(), second);

        tree.replace_in_parent(first, wrapper);
        tree.append_child(wrapper, first);

        assert_eq!(tree[tree.root()].children(), &[wrapper, second]);
        assert_eq!(tree[first].parent(), Some(wrapper));
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn given_mixed_kinds_when_counting_then_only_matching_kind_is_counted() {
        let (mut tree, a, _) = chain();
        let armature = tree.push(VNode::new("Armature", VNodeKind::Armature));
        tree.append_child(a, armature);

        assert_eq!(tree.count_kind(VNodeKind::is_object), 2);
        assert_eq!(tree.count_kind(VNodeKind::is_armature), 1);
        assert_eq!(tree.count_kind(VNodeKind::is_joint), 0);
    }
}
