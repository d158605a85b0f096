use std::collections::{BTreeSet, HashMap};

use log::{debug, info, warn};

use crate::{
    error::GraphError,
    options::{ImportOptions, SkinSharing},
    source::{NodeId, SourceGraph, SourceNode},
};

use super::{Instance, JointData, VNode, VNodeId, VNodeKind, VTree};

/// Rewrite the flat source graph into a vnode tree the target scene can hold.
///
/// Every skinned joint set ends up under exactly one armature vnode, joints
/// that also instance a mesh / camera / light hand the instance to a new child
/// object, and the forwarding map records every vnode a source node produced.
pub fn build_vtree(graph: &SourceGraph, options: &ImportOptions) -> Result<VTree, GraphError> {
    let parents = check_source_graph(graph)?;
    let roots = collect_roots(graph, &parents)?;

    let root_name = options
        .root_name
        .clone()
        .unwrap_or_else(|| graph.name.clone());
    let mut tree = VTree::new(root_name);
    let vnode_of = create_object_vnodes(graph, &roots, &mut tree);

    let groups = group_skins(graph, &tree, &vnode_of)?;
    for (group, plan) in &groups {
        let armature = build_armature(&mut tree, graph, options, group, plan);

        let (primary_skins, duplicated_skins) = match options.skin_sharing {
            SkinSharing::Merge => (group.skins.as_slice(), &[][..]),
            SkinSharing::PerSkin => group.skins.split_at(1),
        };
        for &skin in primary_skins {
            for &joint in &graph.skins[skin].joints {
                tree.record_skin_joint(skin, joint, vnode_of[&joint]);
            }
        }
        for &skin in duplicated_skins {
            duplicate_for_skin(&mut tree, graph, armature, skin, &vnode_of);
        }
    }

    tree.validate()?;
    info!(
        "built vnode tree: {} vnodes, {} armatures, {} joints",
        tree.len(),
        tree.count_kind(VNodeKind::is_armature),
        tree.count_kind(VNodeKind::is_joint)
    );
    Ok(tree)
}

/// Checks references and shape of the source graph; returns each node's parent.
fn check_source_graph(graph: &SourceGraph) -> Result<Vec<Option<NodeId>>, GraphError> {
    let count = graph.nodes.len();
    let mut parents: Vec<Option<NodeId>> = vec![None; count];

    for (index, node) in graph.nodes.iter().enumerate() {
        for &child in &node.children {
            if child >= count {
                return Err(GraphError::DanglingChild {
                    parent: index,
                    child,
                });
            }
            if let Some(first) = parents[child] {
                return Err(GraphError::SharedChild {
                    child,
                    first,
                    second: index,
                });
            }
            parents[child] = Some(index);
        }

        if let Some(skin) = node.mesh.as_ref().and_then(|mesh| mesh.skin)
            && skin >= graph.skins.len()
        {
            return Err(GraphError::DanglingSkin { node: index, skin });
        }
    }

    for (skin_index, skin) in graph.skins.iter().enumerate() {
        for &joint in skin.joints.iter().chain(skin.skeleton.iter()) {
            if joint >= count {
                return Err(GraphError::DanglingJoint {
                    skin: skin_index,
                    joint,
                });
            }
        }
    }

    find_cycle(&parents)?;
    Ok(parents)
}

fn find_cycle(parents: &[Option<NodeId>]) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Unknown,
        OnPath,
        Acyclic,
    }

    let mut state = vec![State::Unknown; parents.len()];
    for start in 0..parents.len() {
        let mut path = Vec::new();
        let mut current = Some(start);
        while let Some(node) = current {
            match state[node] {
                State::Acyclic => break,
                State::OnPath => return Err(GraphError::Cycle { node }),
                State::Unknown => {
                    state[node] = State::OnPath;
                    path.push(node);
                    current = parents[node];
                }
            }
        }
        for node in path {
            state[node] = State::Acyclic;
        }
    }
    Ok(())
}

fn topmost(parents: &[Option<NodeId>], mut node: NodeId) -> NodeId {
    while let Some(parent) = parents[node] {
        node = parent;
    }
    node
}

/// Scene roots, plus the top of any tree holding a joint the scenes do not reach.
fn collect_roots(
    graph: &SourceGraph,
    parents: &[Option<NodeId>],
) -> Result<Vec<NodeId>, GraphError> {
    let mut roots: Vec<NodeId> = Vec::new();

    for &node in &graph.scene_roots {
        if node >= graph.nodes.len() {
            return Err(GraphError::DanglingRoot { node });
        }
        let top = topmost(parents, node);
        if top != node {
            warn!(
                "scene root {} has a parent; importing its whole tree from {}",
                graph.node_name(node),
                graph.node_name(top)
            );
        }
        if !roots.contains(&top) {
            roots.push(top);
        }
    }

    for skin in &graph.skins {
        for &joint in &skin.joints {
            let top = topmost(parents, joint);
            if !roots.contains(&top) {
                debug!(
                    "joint {} is outside every scene; importing tree {}",
                    graph.node_name(joint),
                    graph.node_name(top)
                );
                roots.push(top);
            }
        }
    }

    Ok(roots)
}

fn create_object_vnodes(
    graph: &SourceGraph,
    roots: &[NodeId],
    tree: &mut VTree,
) -> HashMap<NodeId, VNodeId> {
    let mut vnode_of = HashMap::new();
    let mut stack: Vec<(NodeId, VNodeId)> =
        roots.iter().rev().map(|&node| (node, tree.root())).collect();

    while let Some((node, parent)) = stack.pop() {
        let source = &graph.nodes[node];
        let mut vnode = VNode::new(graph.node_name(node), VNodeKind::Object);
        vnode.trs = source.transform.to_trs();
        vnode.instance = instance_for(graph, node, source);
        vnode.source = Some(node);

        let id = tree.push(vnode);
        tree.append_child(parent, id);
        tree.record_node(node, id);
        vnode_of.insert(node, id);

        stack.extend(source.children.iter().rev().map(|&child| (child, id)));
    }

    vnode_of
}

/// A target object holds one data block, so a mesh wins over a camera, which
/// wins over a light.
fn instance_for(graph: &SourceGraph, node: NodeId, source: &SourceNode) -> Option<Instance> {
    let mut candidates = source
        .mesh
        .clone()
        .map(Instance::Mesh)
        .into_iter()
        .chain(source.camera.map(Instance::Camera))
        .chain(source.light.map(Instance::Light));

    let chosen = candidates.next();
    let dropped = candidates.count();
    if dropped > 0 {
        warn!(
            "node {} instances more than one data block; keeping only {:?}",
            graph.node_name(node),
            chosen
        );
    }
    chosen
}

#[derive(Debug, Clone)]
struct SkinGroup {
    skins: Vec<usize>,
    joints: BTreeSet<VNodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmatureSite {
    /// The first non-joint ancestor becomes the armature.
    Convert(VNodeId),
    /// The joints hang straight off the tree root; a new armature is inserted.
    Insert,
}

#[derive(Debug, Clone)]
struct GroupPlan {
    site: ArmatureSite,
    /// Bones directly below the armature, in sibling order.
    tops: Vec<VNodeId>,
    /// Every vnode that becomes a joint: the skin joints plus the nodes between
    /// them and the armature.
    bones: BTreeSet<VNodeId>,
}

impl GroupPlan {
    /// Vnodes whose subtrees the armature's edit-mode scope covers.
    fn scopes(&self) -> Vec<VNodeId> {
        match self.site {
            ArmatureSite::Convert(site) => vec![site],
            ArmatureSite::Insert => self.tops.clone(),
        }
    }
}

fn lowest_common_ancestor(tree: &VTree, nodes: &BTreeSet<VNodeId>) -> VNodeId {
    let mut common: Option<Vec<VNodeId>> = None;
    for &node in nodes {
        let mut path: Vec<VNodeId> = tree.ancestors(node).collect();
        path.reverse();
        path.push(node);

        common = Some(match common {
            None => path,
            Some(previous) => previous
                .into_iter()
                .zip(path)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    common
        .and_then(|path| path.last().copied())
        .unwrap_or(tree.root())
}

fn plan_group(tree: &VTree, joints: &BTreeSet<VNodeId>) -> GroupPlan {
    let root = tree.root();
    let lca = lowest_common_ancestor(tree, joints);
    let site_node = if lca != root && joints.contains(&lca) {
        tree[lca].parent().unwrap_or(root)
    } else {
        lca
    };

    let mut bones = BTreeSet::new();
    for &joint in joints {
        let mut current = Some(joint);
        while let Some(node) = current {
            if node == site_node {
                break;
            }
            bones.insert(node);
            current = tree[node].parent();
        }
    }

    let tops = tree[site_node]
        .children()
        .iter()
        .copied()
        .filter(|child| bones.contains(child))
        .collect();

    GroupPlan {
        site: if site_node == root {
            ArmatureSite::Insert
        } else {
            ArmatureSite::Convert(site_node)
        },
        tops,
        bones,
    }
}

fn scopes_overlap(tree: &VTree, a: &GroupPlan, b: &GroupPlan) -> bool {
    let related =
        |x: VNodeId, y: VNodeId| x == y || tree.is_ancestor(x, y) || tree.is_ancestor(y, x);
    let b_scopes = b.scopes();
    a.scopes()
        .into_iter()
        .any(|x| b_scopes.iter().any(|&y| related(x, y)))
}

/// Group skins into armatures.
///
/// Edit mode cannot nest, so skins whose armature subtrees would overlap
/// (shared joints, a skeleton living below another skeleton's bones, or the
/// same armature site) are merged until every group's subtree is disjoint.
fn group_skins(
    graph: &SourceGraph,
    tree: &VTree,
    vnode_of: &HashMap<NodeId, VNodeId>,
) -> Result<Vec<(SkinGroup, GroupPlan)>, GraphError> {
    let mut groups: Vec<SkinGroup> = Vec::new();

    for (skin_index, skin) in graph.skins.iter().enumerate() {
        if skin.joints.is_empty() {
            debug!("skin {skin_index} has no joints; no armature needed");
            continue;
        }
        let joints: BTreeSet<VNodeId> = skin
            .joints
            .iter()
            .filter_map(|joint| vnode_of.get(joint).copied())
            .collect();

        if let Some(skeleton) = skin.skeleton {
            let skeleton_vnode = vnode_of.get(&skeleton).copied();
            for &joint in &skin.joints {
                let joint_vnode = vnode_of[&joint];
                let covers = skeleton_vnode.is_some_and(|skeleton_vnode| {
                    skeleton_vnode == joint_vnode || tree.is_ancestor(skeleton_vnode, joint_vnode)
                });
                if !covers {
                    return Err(GraphError::AmbiguousSplit {
                        skin: skin_index,
                        skeleton,
                        joint,
                    });
                }
            }
        }

        groups.push(SkinGroup {
            skins: vec![skin_index],
            joints,
        });
    }

    loop {
        let plans: Vec<GroupPlan> = groups
            .iter()
            .map(|group| plan_group(tree, &group.joints))
            .collect();

        let overlap = (0..plans.len()).find_map(|i| {
            ((i + 1)..plans.len())
                .find(|&j| scopes_overlap(tree, &plans[i], &plans[j]))
                .map(|j| (i, j))
        });

        let Some((keep, absorbed)) = overlap else {
            for group in &mut groups {
                group.skins.sort_unstable();
            }
            return Ok(groups.into_iter().zip(plans).collect());
        };

        let merged = groups.remove(absorbed);
        debug!(
            "skins {:?} and {:?} share an armature",
            groups[keep].skins, merged.skins
        );
        groups[keep].skins.extend(merged.skins);
        groups[keep].joints.extend(merged.joints);
    }
}

fn build_armature(
    tree: &mut VTree,
    graph: &SourceGraph,
    options: &ImportOptions,
    group: &SkinGroup,
    plan: &GroupPlan,
) -> VNodeId {
    let armature = match plan.site {
        ArmatureSite::Convert(site) => {
            split_instance(tree, site);
            tree.node_mut(site).kind = VNodeKind::Armature;
            site
        }
        ArmatureSite::Insert => {
            let name = group
                .skins
                .first()
                .and_then(|&skin| graph.skins[skin].name.clone())
                .unwrap_or_else(|| "Armature".to_string());
            let armature = tree.push(VNode::new(name, VNodeKind::Armature));
            if let Some(&first) = plan.tops.first() {
                tree.replace_in_parent(first, armature);
            }
            for &top in &plan.tops {
                tree.append_child(armature, top);
            }
            armature
        }
    };
    debug!(
        "armature {} ({}) owns {} joints for skins {:?}",
        tree[armature].name,
        armature,
        plan.bones.len(),
        group.skins
    );

    let order: Vec<VNodeId> = tree
        .subtree(armature)
        .into_iter()
        .filter(|node| plan.bones.contains(node))
        .collect();

    for bone in order {
        let trs = tree[bone].trs;
        let parent_joint = tree[bone]
            .parent()
            .and_then(|parent| tree[parent].joint().cloned());

        let uniform = trs.is_uniform_scale(options.uniform_scale_epsilon);
        let rest = if uniform { trs } else { trs.without_scale() };
        let local_to_armature = match &parent_joint {
            Some(parent) => parent.local_to_armature * rest.to_matrix(),
            None => rest.to_matrix(),
        };

        let child_distances: Vec<f32> = tree[bone]
            .children()
            .iter()
            .filter(|child| plan.bones.contains(*child))
            .map(|&child| tree[child].trs.translation.norm())
            .collect();
        let length = if !child_distances.is_empty() {
            child_distances.iter().sum::<f32>() / child_distances.len() as f32
        } else if let Some(parent) = &parent_joint {
            parent.bone_length
        } else {
            options.default_bone_length
        };

        if !uniform {
            debug!(
                "joint {} has non-uniform scale {:?}; moving it to the pose",
                tree[bone].name, trs.scale
            );
        }

        tree.node_mut(bone).kind = VNodeKind::Joint(JointData {
            armature,
            local_to_armature,
            bone_length: length.max(options.min_bone_length),
            pose_scale_override: (!uniform).then_some(trs.scale),
        });
        split_instance(tree, bone);
    }

    armature
}

/// Move the instance held by `owner` onto a new child object.
fn split_instance(tree: &mut VTree, owner: VNodeId) -> Option<VNodeId> {
    let instance = tree.node_mut(owner).instance.take()?;
    let is_mesh = matches!(instance, Instance::Mesh(_));
    let source = tree[owner].source;

    let mut carrier = VNode::new(tree[owner].name.clone(), VNodeKind::Object);
    carrier.instance = Some(instance);
    carrier.source = source;
    let carrier = tree.push(carrier);
    tree.append_child(owner, carrier);

    if is_mesh {
        tree.node_mut(owner).mesh_moved_to.push(carrier);
    }
    if let Some(node) = source {
        tree.record_node(node, carrier);
    }
    debug!(
        "moved instance of {} to child {}",
        tree[owner].name, carrier
    );
    Some(carrier)
}

/// Give `skin` its own armature holding copies of the joints it uses.
fn duplicate_for_skin(
    tree: &mut VTree,
    graph: &SourceGraph,
    primary: VNodeId,
    skin: usize,
    vnode_of: &HashMap<NodeId, VNodeId>,
) {
    let mut needed = BTreeSet::new();
    for joint in &graph.skins[skin].joints {
        let mut current = Some(vnode_of[joint]);
        while let Some(node) = current {
            if node == primary {
                break;
            }
            needed.insert(node);
            current = tree[node].parent();
        }
    }

    let mut armature = VNode::new(tree[primary].name.clone(), VNodeKind::Armature);
    armature.trs = tree[primary].trs;
    armature.source = tree[primary].source;
    let armature = tree.push(armature);
    let parent = tree[primary].parent().unwrap_or(tree.root());
    tree.append_child(parent, armature);
    if let Some(node) = tree[armature].source {
        tree.record_node(node, armature);
    }

    let originals: Vec<VNodeId> = tree
        .subtree(primary)
        .into_iter()
        .filter(|node| needed.contains(node))
        .collect();

    let mut copies: HashMap<VNodeId, VNodeId> = HashMap::new();
    for original in originals {
        let Some(joint) = tree[original].joint().cloned() else {
            continue;
        };
        let mut copy = VNode::new(
            tree[original].name.clone(),
            VNodeKind::Joint(JointData {
                armature,
                ..joint
            }),
        );
        copy.trs = tree[original].trs;
        copy.source = tree[original].source;
        let copy_id = tree.push(copy);

        let parent = tree[original]
            .parent()
            .and_then(|parent| copies.get(&parent).copied())
            .unwrap_or(armature);
        tree.append_child(parent, copy_id);
        if let Some(node) = tree[copy_id].source {
            tree.record_node(node, copy_id);
        }
        copies.insert(original, copy_id);
    }

    for &joint in &graph.skins[skin].joints {
        if let Some(&copy) = copies.get(&vnode_of[&joint]) {
            tree.record_skin_joint(skin, joint, copy);
        }
    }
    debug!(
        "skin {} gets its own armature {} with {} duplicated joints",
        skin,
        armature,
        copies.len()
    );
}
