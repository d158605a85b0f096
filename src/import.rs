use log::info;
use serde::Serialize;

use crate::{
    animation::{MorphAction, bind_all_morph_weight_animations},
    error::ImportError,
    host::{AnimationHost, SceneHost},
    options::ImportOptions,
    realize::{RealizeStats, link_everything_into_scene, realize},
    source::SourceGraph,
    vtree::{VNodeKind, VTree, build_vtree},
};

/// Summary of one import, printed by the command-line tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub document: String,
    pub vnodes: usize,
    pub objects: usize,
    pub armatures: usize,
    pub joints: usize,
    /// Instances moved off a joint onto a child object.
    pub split_instances: usize,
    /// Joint vnodes beyond the first produced from the same source node.
    pub duplicated_joints: usize,
    pub realized: RealizeStats,
    pub linked: usize,
    pub morph_actions: Vec<MorphAction>,
}

impl ImportReport {
    fn from_tree(document: &str, tree: &VTree) -> Self {
        let mut split_instances = 0;
        let mut duplicated_joints = 0;
        for id in tree.ids() {
            let node = &tree[id];
            let Some(source) = node.source else {
                continue;
            };
            if tree.primary_vnode(source) == Some(id) {
                continue;
            }
            match node.kind {
                VNodeKind::Object if node.instance.is_some() => split_instances += 1,
                VNodeKind::Joint(_) => duplicated_joints += 1,
                _ => {}
            }
        }

        Self {
            document: document.to_string(),
            vnodes: tree.len(),
            objects: tree.count_kind(VNodeKind::is_object),
            armatures: tree.count_kind(VNodeKind::is_armature),
            joints: tree.count_kind(VNodeKind::is_joint),
            split_instances,
            duplicated_joints,
            ..Self::default()
        }
    }
}

/// Build the vnode tree for `graph`, realize it in `host`, link it into the
/// scene and bind morph weight animations.
pub fn import_scene<H: SceneHost + AnimationHost + ?Sized>(
    graph: &SourceGraph,
    host: &mut H,
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    options.validate().map_err(ImportError::Options)?;

    let mut tree = build_vtree(graph, options)?;
    let mut report = ImportReport::from_tree(&graph.name, &tree);

    report.realized = realize(&mut tree, graph, host, options)?;
    report.linked = link_everything_into_scene(&tree, host)?;
    report.morph_actions = bind_all_morph_weight_animations(&tree, graph, host)?;

    info!(
        "imported {}: {} vnodes, {} armatures, {} morph actions",
        graph.name,
        report.vnodes,
        report.armatures,
        report.morph_actions.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::GraphError,
        memory::MemoryScene,
        source::{MeshInstance, SourceNode, SourceSkin},
    };

    fn character() -> SourceGraph {
        SourceGraph {
            name: "character.glb".to_string(),
            nodes: vec![
                SourceNode {
                    name: Some("Character".to_string()),
                    children: vec![1, 3],
                    ..SourceNode::default()
                },
                SourceNode {
                    name: Some("hips".to_string()),
                    children: vec![2],
                    camera: Some(0),
                    ..SourceNode::default()
                },
                SourceNode {
                    name: Some("spine".to_string()),
                    ..SourceNode::default()
                },
                SourceNode {
                    name: Some("Body".to_string()),
                    mesh: Some(MeshInstance {
                        mesh: 0,
                        skin: Some(0),
                        ..MeshInstance::default()
                    }),
                    ..SourceNode::default()
                },
            ],
            skins: vec![SourceSkin {
                joints: vec![1, 2],
                ..SourceSkin::default()
            }],
            scene_roots: vec![0],
            ..SourceGraph::default()
        }
    }

    #[test]
    fn given_character_when_importing_then_report_counts_every_stage() {
        let mut scene = MemoryScene::new();

        let report = import_scene(&character(), &mut scene, &ImportOptions::default())
            .expect("import succeeds");

        assert_eq!(report.document, "character.glb");
        assert_eq!(report.armatures, 1);
        assert_eq!(report.joints, 2);
        assert_eq!(report.split_instances, 1);
        assert_eq!(report.duplicated_joints, 0);
        assert_eq!(report.realized.bones, 2);
        assert_eq!(report.realized.vertex_groups, 2);
        assert_eq!(report.linked, 3);
        assert_eq!(scene.edit_mode(), None);
    }

    #[test]
    fn given_invalid_options_when_importing_then_nothing_is_created() {
        let mut scene = MemoryScene::new();
        let options = ImportOptions {
            min_bone_length: -1.0,
            ..ImportOptions::default()
        };

        let error = import_scene(&character(), &mut scene, &options).expect_err("rejected");

        assert!(matches!(error, ImportError::Options(_)));
        assert_eq!(scene.objects().count(), 0);
    }

    #[test]
    fn given_dangling_joint_when_importing_then_graph_error_is_surfaced() {
        let mut graph = character();
        graph.skins[0].joints.push(42);
        let mut scene = MemoryScene::new();

        let error =
            import_scene(&graph, &mut scene, &ImportOptions::default()).expect_err("rejected");

        assert!(matches!(
            error,
            ImportError::Graph(GraphError::DanglingJoint { joint: 42, .. })
        ));
    }

    #[test]
    fn given_report_when_serialized_then_json_has_stage_counts() {
        let mut scene = MemoryScene::new();
        let report = import_scene(&character(), &mut scene, &ImportOptions::default())
            .expect("import succeeds");

        let json = serde_json::to_value(&report).expect("serialize report");

        assert_eq!(json["armatures"], 1);
        assert_eq!(json["realized"]["bones"], 2);
    }
}
