//! Binding of morph-target weight channels to realized mesh objects.
//!
//! Only the action and its curve paths are decided here; building keyframes
//! from sampler data is left to [`AnimationHost::make_fcurves`].

use log::{debug, info};
use serde::Serialize;

use crate::{
    error::RealizationError,
    host::{ActionHandle, ActionTarget, AnimationHost, SceneHost},
    source::{MorphWeightChannel, SourceGraph},
    vtree::{VTree, find_node_mesh_instances},
};

/// An action created for one mesh object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MorphAction {
    pub object: String,
    pub name: String,
    #[serde(skip)]
    pub action: ActionHandle,
}

/// Quote a string for use inside a data path, e.g. `key_blocks["Morph 0"]`.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

pub fn morph_data_paths(target_count: usize) -> Vec<(String, usize)> {
    (0..target_count)
        .map(|index| {
            (
                format!("key_blocks[{}].value", quote(&format!("Morph {index}"))),
                0,
            )
        })
        .collect()
}

/// Create one shape-key action per mesh instance the channel's node ended up
/// at.
///
/// An instance whose data has no shape keys is skipped on its own; the
/// remaining instances of the same node are still bound.
pub fn bind_morph_weight_animation<H: SceneHost + AnimationHost + ?Sized>(
    tree: &VTree,
    graph: &SourceGraph,
    host: &mut H,
    animation: usize,
    channel: &MorphWeightChannel,
) -> Result<Vec<MorphAction>, RealizationError> {
    let animation_name = graph
        .animations
        .get(animation)
        .and_then(|animation| animation.name.clone())
        .unwrap_or_else(|| format!("animations[{animation}]"));

    let mut actions = Vec::new();
    for id in find_node_mesh_instances(tree, channel.node) {
        let node = &tree[id];
        let (Some(entity), Some(object_name)) = (node.entity, node.realized_name.as_deref())
        else {
            return Err(RealizationError::Unrealized {
                vnode: node.name.clone(),
                phase: "animation binding",
            });
        };

        let Some(data) = host.object_data(entity) else {
            continue;
        };
        if !host.has_shape_keys(data) {
            // Morph targets without positions produce no shape keys.
            debug!("{object_name} has no shape keys; skipping morph animation");
            continue;
        }

        let name = format!("{animation_name}@{object_name} (Morph)");
        let action = host
            .create_action(&name, ActionTarget::ShapeKeys)
            .map_err(|source| RealizationError::EntityCreateFailed {
                vnode: node.name.clone(),
                source,
            })?;

        let target_count = node
            .mesh()
            .and_then(|mesh| graph.meshes.get(mesh.mesh))
            .map(|mesh| mesh.morph_target_count)
            .unwrap_or(0);
        host.make_fcurves(
            action,
            animation,
            channel.sampler,
            &morph_data_paths(target_count),
        )
        .map_err(|source| RealizationError::EntityCreateFailed {
            vnode: node.name.clone(),
            source,
        })?;

        actions.push(MorphAction {
            object: object_name.to_string(),
            name,
            action,
        });
    }
    Ok(actions)
}

/// Bind every morph-weight channel of every animation.
pub fn bind_all_morph_weight_animations<H: SceneHost + AnimationHost + ?Sized>(
    tree: &VTree,
    graph: &SourceGraph,
    host: &mut H,
) -> Result<Vec<MorphAction>, RealizationError> {
    let mut actions = Vec::new();
    for (index, animation) in graph.animations.iter().enumerate() {
        for channel in &animation.morph_weight_channels {
            actions.extend(bind_morph_weight_animation(
                tree, graph, host, index, channel,
            )?);
        }
    }
    if !actions.is_empty() {
        info!("created {} morph weight actions", actions.len());
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryScene,
        options::ImportOptions,
        realize::realize,
        source::{MeshInstance, SourceAnimation, SourceMesh, SourceNode, SourceSkin},
        vtree::{Instance, VNode, VNodeKind, build_vtree},
    };

    fn graph_with_morphs(animation_name: Option<&str>) -> SourceGraph {
        SourceGraph {
            name: "face.gltf".to_string(),
            nodes: vec![
                SourceNode {
                    name: Some("Rig".to_string()),
                    children: vec![1],
                    ..SourceNode::default()
                },
                SourceNode {
                    name: Some("Head".to_string()),
                    mesh: Some(MeshInstance {
                        mesh: 0,
                        weights: vec![0.0, 1.0],
                        ..MeshInstance::default()
                    }),
                    ..SourceNode::default()
                },
            ],
            skins: vec![SourceSkin {
                joints: vec![1],
                ..SourceSkin::default()
            }],
            meshes: vec![SourceMesh {
                name: Some("Face".to_string()),
                morph_target_count: 2,
            }],
            animations: vec![SourceAnimation {
                name: animation_name.map(ToOwned::to_owned),
                morph_weight_channels: vec![MorphWeightChannel {
                    node: 1,
                    sampler: 3,
                }],
            }],
            scene_roots: vec![0],
        }
    }

    fn realized(graph: &SourceGraph, scene: &mut MemoryScene) -> VTree {
        let options = ImportOptions::default();
        let mut tree = build_vtree(graph, &options).expect("tree builds");
        realize(&mut tree, graph, scene, &options).expect("realize");
        tree
    }

    #[test]
    fn given_value_with_quotes_when_quoting_then_they_are_escaped() {
        assert_eq!(quote("Morph 0"), "\"Morph 0\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn given_split_joint_mesh_when_binding_then_action_targets_moved_instance() {
        let graph = graph_with_morphs(Some("Blink"));
        let mut scene = MemoryScene::new();
        scene.define_shape_keys(0, 2);
        let tree = realized(&graph, &mut scene);

        let actions = bind_all_morph_weight_animations(&tree, &graph, &mut scene)
            .expect("bind animations");

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name, "Blink@Head (Morph)");
        let recorded = &scene.actions()[0];
        assert_eq!(recorded.target, ActionTarget::ShapeKeys);
        assert_eq!(recorded.fcurves.len(), 1);
        assert_eq!(recorded.fcurves[0].sampler, 3);
        assert_eq!(
            recorded.fcurves[0].data_paths,
            vec![
                ("key_blocks[\"Morph 0\"].value".to_string(), 0),
                ("key_blocks[\"Morph 1\"].value".to_string(), 0),
            ]
        );
    }

    #[test]
    fn given_unnamed_animation_when_binding_then_index_is_used_in_name() {
        let graph = graph_with_morphs(None);
        let mut scene = MemoryScene::new();
        scene.define_shape_keys(0, 2);
        let tree = realized(&graph, &mut scene);

        let actions = bind_all_morph_weight_animations(&tree, &graph, &mut scene)
            .expect("bind animations");

        assert!(actions[0].name.starts_with("animations[0]@"));
    }

    #[test]
    fn given_mesh_without_shape_keys_when_binding_then_nothing_is_created() {
        let graph = graph_with_morphs(Some("Blink"));
        let mut scene = MemoryScene::new();
        let tree = realized(&graph, &mut scene);

        let actions = bind_all_morph_weight_animations(&tree, &graph, &mut scene)
            .expect("bind animations");

        assert!(actions.is_empty());
        assert!(scene.actions().is_empty());
    }

    #[test]
    fn given_initial_weights_when_realizing_then_shape_keys_hold_them() {
        let graph = graph_with_morphs(Some("Blink"));
        let mut scene = MemoryScene::new();
        scene.define_shape_keys(0, 2);
        let tree = realized(&graph, &mut scene);

        let carrier = find_node_mesh_instances(&tree, 1)[0];
        let entity = tree[carrier].entity.expect("carrier realized");
        let data = scene.object_data(entity).expect("mesh data");
        assert_eq!(scene.shape_key_value(data, "Morph 1"), Some(1.0));
    }

    #[test]
    fn given_instance_without_shape_keys_first_when_binding_then_later_instance_is_bound() {
        let graph = graph_with_morphs(Some("Blink"));
        let mut tree = VTree::new("face.gltf");
        for (name, mesh) in [("Plain", 1), ("Head", 0)] {
            let mut vnode = VNode::new(name, VNodeKind::Object);
            vnode.instance = Some(Instance::Mesh(MeshInstance {
                mesh,
                ..MeshInstance::default()
            }));
            let id = tree.push(vnode);
            tree.append_child(tree.root(), id);
            tree.record_node(1, id);
        }
        let mut scene = MemoryScene::new();
        scene.define_shape_keys(0, 2);
        realize(&mut tree, &graph, &mut scene, &ImportOptions::default()).expect("realize");

        let actions = bind_all_morph_weight_animations(&tree, &graph, &mut scene)
            .expect("bind animations");

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].object, "Head");
    }
}
