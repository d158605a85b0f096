//! Instantiate a vnode tree in a [`SceneHost`].
//!
//! Pass 1 walks the tree pre-order and creates every entity, holding skeletal
//! edit mode for exactly one armature subtree at a time. Pass 2 runs once
//! every entity exists and wires what depends on other entities: vertex groups
//! and armature bindings for skinned meshes, and pose scale for joints whose
//! rest pose could not hold their scale.

mod edit_mode;
mod link;

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    error::{HostError, RealizationError},
    host::{BoneSpec, EntityHandle, LeafRequest, SceneHost, TransformSpace},
    options::ImportOptions,
    source::SourceGraph,
    transform::resolve_edit_bone,
    vtree::{Instance, JointData, VNodeId, VNodeKind, VTree},
};

pub use edit_mode::EditModeScope;
pub use link::link_everything_into_scene;

/// Counts gathered while realizing, reported back to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RealizeStats {
    pub objects: usize,
    pub armatures: usize,
    pub bones: usize,
    pub skinned_instances: usize,
    pub vertex_groups: usize,
    pub pose_overrides: usize,
}

/// Run both passes over `tree`.
pub fn realize<H: SceneHost + ?Sized>(
    tree: &mut VTree,
    graph: &SourceGraph,
    host: &mut H,
    options: &ImportOptions,
) -> Result<RealizeStats, RealizationError> {
    let mut stats = RealizeStats::default();
    realize_entities(tree, host, options, &mut stats)?;
    bind_skins_and_poses(tree, graph, host, &mut stats)?;
    info!(
        "realized {} objects, {} armatures, {} bones",
        stats.objects, stats.armatures, stats.bones
    );
    Ok(stats)
}

/// Pass 1.
pub fn realize_entities<H: SceneHost + ?Sized>(
    tree: &mut VTree,
    host: &mut H,
    options: &ImportOptions,
    stats: &mut RealizeStats,
) -> Result<(), RealizationError> {
    let root = tree.root();
    realize_vnode(tree, root, host, options, stats)
}

fn realize_vnode<H: SceneHost + ?Sized>(
    tree: &mut VTree,
    id: VNodeId,
    host: &mut H,
    options: &ImportOptions,
    stats: &mut RealizeStats,
) -> Result<(), RealizationError> {
    let kind = tree[id].kind.clone();
    match kind {
        VNodeKind::Root => {
            if options.add_root {
                realize_object(tree, id, host)?;
                stats.objects += 1;
            }
            realize_children(tree, id, host, options, stats)
        }
        VNodeKind::Object => {
            realize_object(tree, id, host)?;
            stats.objects += 1;
            realize_children(tree, id, host, options, stats)
        }
        VNodeKind::Armature => {
            let armature = realize_armature(tree, id, host)?;
            stats.armatures += 1;

            let mut scope = EditModeScope::enter(host, armature)?;
            realize_children(tree, id, &mut *scope, options, stats)?;
            scope.release()?;

            if host.scene_contains(armature) {
                host.unlink_from_scene(armature)
                    .map_err(|source| RealizationError::SceneLink {
                        vnode: tree[id].name.clone(),
                        source,
                    })?;
            }
            Ok(())
        }
        VNodeKind::Joint(joint) => {
            realize_bone(tree, id, &joint, host)?;
            stats.bones += 1;
            realize_children(tree, id, host, options, stats)
        }
    }
}

fn realize_children<H: SceneHost + ?Sized>(
    tree: &mut VTree,
    id: VNodeId,
    host: &mut H,
    options: &ImportOptions,
    stats: &mut RealizeStats,
) -> Result<(), RealizationError> {
    let children = tree[id].children().to_vec();
    for child in children {
        realize_vnode(tree, child, host, options, stats)?;
    }
    Ok(())
}

fn create_failed(vnode: &str) -> impl FnOnce(HostError) -> RealizationError + '_ {
    move |source| RealizationError::EntityCreateFailed {
        vnode: vnode.to_string(),
        source,
    }
}

fn realize_object<H: SceneHost + ?Sized>(
    tree: &mut VTree,
    id: VNodeId,
    host: &mut H,
) -> Result<(), RealizationError> {
    let node = &tree[id];

    let data = match &node.instance {
        None => None,
        Some(Instance::Mesh(mesh)) => {
            let data = host
                .leaf_data(LeafRequest::Mesh {
                    mesh: mesh.mesh,
                    primitive: mesh.primitive,
                })
                .map_err(create_failed(&node.name))?;
            if !mesh.weights.is_empty() && host.has_shape_keys(data) {
                for (index, weight) in mesh.weights.iter().enumerate() {
                    let key = format!("Morph {index}");
                    let found = host
                        .set_shape_key_value(data, &key, *weight)
                        .map_err(create_failed(&node.name))?;
                    if !found {
                        debug!("{} has no shape key {key}", node.name);
                    }
                }
            }
            Some(data)
        }
        Some(Instance::Camera(camera)) => Some(
            host.leaf_data(LeafRequest::Camera(*camera))
                .map_err(create_failed(&node.name))?,
        ),
        Some(Instance::Light(light)) => Some(
            host.leaf_data(LeafRequest::Light(*light))
                .map_err(create_failed(&node.name))?,
        ),
    };

    let created = host
        .create_object(&node.name, data)
        .map_err(create_failed(&node.name))?;
    host.set_transform(created.entity, &node.trs)
        .map_err(create_failed(&node.name))?;
    debug!("{} -> object {} '{}'", id, created.entity, created.name);

    let vnode = tree.node_mut(id);
    vnode.entity = Some(created.entity);
    vnode.realized_name = Some(created.name);
    attach_to_parent(tree, id, host)
}

fn realize_armature<H: SceneHost + ?Sized>(
    tree: &mut VTree,
    id: VNodeId,
    host: &mut H,
) -> Result<EntityHandle, RealizationError> {
    let node = &tree[id];
    let created = host
        .create_armature(&node.name)
        .map_err(create_failed(&node.name))?;
    host.set_transform(created.entity, &node.trs)
        .map_err(create_failed(&node.name))?;
    debug!("{} -> armature {} '{}'", id, created.entity, created.name);

    let entity = created.entity;
    let vnode = tree.node_mut(id);
    vnode.entity = Some(entity);
    vnode.realized_name = Some(created.name);
    attach_to_parent(tree, id, host)?;
    Ok(entity)
}

/// Parent an object or armature entity to whatever its parent vnode became.
fn attach_to_parent<H: SceneHost + ?Sized>(
    tree: &VTree,
    id: VNodeId,
    host: &mut H,
) -> Result<(), RealizationError> {
    let node = &tree[id];
    let (Some(entity), Some(parent_id)) = (node.entity, node.parent()) else {
        return Ok(());
    };
    let parent = &tree[parent_id];

    match &parent.kind {
        VNodeKind::Root if parent.entity.is_none() => Ok(()),
        VNodeKind::Joint(joint) => {
            let armature = tree[joint.armature].entity.ok_or_else(|| {
                RealizationError::MissingArmatureOwner {
                    vnode: parent.name.clone(),
                }
            })?;
            let bone = parent
                .realized_name
                .as_deref()
                .ok_or_else(|| unrealized(&parent.name, "bone parenting"))?;
            host.set_parent_bone(entity, armature, bone)
                .map_err(create_failed(&node.name))
        }
        _ => {
            let parent_entity = parent
                .entity
                .ok_or_else(|| unrealized(&parent.name, "parenting"))?;
            host.set_parent(entity, parent_entity)
                .map_err(create_failed(&node.name))
        }
    }
}

fn unrealized(vnode: &str, phase: &'static str) -> RealizationError {
    RealizationError::Unrealized {
        vnode: vnode.to_string(),
        phase,
    }
}

fn realize_bone<H: SceneHost + ?Sized>(
    tree: &mut VTree,
    id: VNodeId,
    joint: &JointData,
    host: &mut H,
) -> Result<(), RealizationError> {
    let node = &tree[id];
    let armature = tree[joint.armature].entity.ok_or_else(|| {
        RealizationError::MissingArmatureOwner {
            vnode: node.name.clone(),
        }
    })?;

    let parent_bone = node
        .parent()
        .map(|parent| &tree[parent])
        .filter(|parent| {
            parent
                .joint()
                .is_some_and(|parent_joint| parent_joint.armature == joint.armature)
        })
        .map(|parent| {
            parent
                .realized_name
                .as_deref()
                .ok_or_else(|| unrealized(&parent.name, "bone creation"))
        })
        .transpose()?;

    let edit_bone = resolve_edit_bone(&joint.local_to_armature, joint.bone_length);
    let name = host
        .create_bone(
            armature,
            BoneSpec {
                name: &node.name,
                edit_bone,
                parent: parent_bone,
            },
        )
        .map_err(create_failed(&node.name))?;
    debug!("{} -> bone '{}' of armature {}", id, name, armature);

    tree.node_mut(id).realized_name = Some(name);
    Ok(())
}

/// Pass 2. Requires every vnode touched to have been realized by pass 1.
pub fn bind_skins_and_poses<H: SceneHost + ?Sized>(
    tree: &VTree,
    graph: &SourceGraph,
    host: &mut H,
    stats: &mut RealizeStats,
) -> Result<(), RealizationError> {
    for id in tree.depth_first() {
        let node = &tree[id];

        if let Some(skin) = node.mesh().and_then(|mesh| mesh.skin) {
            stats.vertex_groups += bind_skin(tree, graph, id, skin, host)?;
            stats.skinned_instances += 1;
        }

        if let VNodeKind::Joint(joint) = &node.kind
            && let Some(scale) = joint.pose_scale_override
        {
            let bone = node
                .realized_name
                .as_deref()
                .ok_or_else(|| unrealized(&node.name, "pose scaling"))?;
            let armature = tree[joint.armature].entity.ok_or_else(|| {
                RealizationError::MissingArmatureOwner {
                    vnode: node.name.clone(),
                }
            })?;
            host.set_pose_bone_scale(armature, bone, scale)
                .map_err(create_failed(&node.name))?;
            stats.pose_overrides += 1;
        }
    }
    Ok(())
}

/// Returns the number of vertex groups created.
fn bind_skin<H: SceneHost + ?Sized>(
    tree: &VTree,
    graph: &SourceGraph,
    id: VNodeId,
    skin: usize,
    host: &mut H,
) -> Result<usize, RealizationError> {
    let node = &tree[id];
    let object = node
        .entity
        .ok_or_else(|| unrealized(&node.name, "skinning"))?;

    let joints = graph
        .skins
        .get(skin)
        .map(|skin| skin.joints.as_slice())
        .unwrap_or_default();
    if joints.is_empty() {
        warn!("{} is skinned by skin {skin}, which has no joints", node.name);
        return Ok(0);
    }

    let mut armature = None;
    for &joint in joints {
        let joint_vnode = tree
            .joint_vnode(skin, joint)
            .ok_or_else(|| unrealized(&graph.node_name(joint), "skinning"))?;
        let joint_node = &tree[joint_vnode];
        let group = joint_node
            .realized_name
            .as_deref()
            .ok_or_else(|| unrealized(&joint_node.name, "skinning"))?;
        host.add_vertex_group(object, group)
            .map_err(create_failed(&node.name))?;

        if armature.is_none() {
            armature = tree.armature_owner(joint_vnode);
        }
    }

    let armature_id = armature.ok_or_else(|| RealizationError::MissingArmatureOwner {
        vnode: node.name.clone(),
    })?;
    let armature_entity = tree[armature_id].entity.ok_or_else(|| {
        RealizationError::MissingArmatureOwner {
            vnode: node.name.clone(),
        }
    })?;

    host.add_armature_modifier(object, armature_entity, true)
        .map_err(create_failed(&node.name))?;
    host.add_copy_transforms_constraint(object, armature_entity, TransformSpace::Local)
        .map_err(create_failed(&node.name))?;
    debug!(
        "{} bound to armature {} with {} vertex groups",
        node.name,
        armature_entity,
        joints.len()
    );
    Ok(joints.len())
}
