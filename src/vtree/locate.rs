use crate::source::NodeId;

use super::{VNodeId, VTree};

/// Vnodes that actually carry the mesh placed at `vnode`.
///
/// A vnode that still holds a mesh is its own answer. Otherwise every vnode the
/// mesh was moved to is followed, in the order the moves happened; the
/// forwarding relation is acyclic, so the walk terminates.
pub fn find_mesh_instances(tree: &VTree, vnode: VNodeId) -> Vec<VNodeId> {
    let mut found = Vec::new();
    let mut stack = vec![vnode];
    while let Some(id) = stack.pop() {
        let node = &tree[id];
        if node.mesh().is_some() {
            found.push(id);
            continue;
        }
        stack.extend(node.mesh_moved_to.iter().rev().copied());
    }
    found
}

/// Mesh instances for every vnode produced from source node `node`.
pub fn find_node_mesh_instances(tree: &VTree, node: NodeId) -> Vec<VNodeId> {
    let mut found: Vec<VNodeId> = Vec::new();
    for &vnode in tree.vnodes_for_node(node) {
        for instance in find_mesh_instances(tree, vnode) {
            if !found.contains(&instance) {
                found.push(instance);
            }
        }
    }
    found
}
