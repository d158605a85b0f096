//! Flat source tables the vnode builder consumes.
//!
//! Decoding the document is left to the `gltf` crate; this module only copies
//! the parts of the node / skin / mesh / animation graph the importer needs
//! into plain indexable tables.

use std::path::Path;

use anyhow::{Context, Result};
use gltf::{Document, animation::Property, scene::Transform};
use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3};

use crate::transform::Trs;

/// Index into [`SourceGraph::nodes`].
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceTransform {
    Trs(Trs),
    Matrix(Matrix4<f32>),
}

impl Default for SourceTransform {
    fn default() -> Self {
        SourceTransform::Trs(Trs::identity())
    }
}

impl SourceTransform {
    pub fn to_trs(&self) -> Trs {
        match self {
            SourceTransform::Trs(trs) => *trs,
            SourceTransform::Matrix(matrix) => Trs::from_matrix(matrix),
        }
    }
}

/// A mesh instantiated at a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshInstance {
    pub mesh: usize,
    /// Restricts the instance to a single primitive; `None` means every primitive.
    pub primitive: Option<usize>,
    pub skin: Option<usize>,
    /// Initial morph target weights for this instance.
    pub weights: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceNode {
    pub name: Option<String>,
    pub children: Vec<NodeId>,
    pub transform: SourceTransform,
    pub mesh: Option<MeshInstance>,
    pub camera: Option<usize>,
    pub light: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceSkin {
    pub name: Option<String>,
    pub joints: Vec<NodeId>,
    pub skeleton: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceMesh {
    pub name: Option<String>,
    pub morph_target_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorphWeightChannel {
    pub node: NodeId,
    pub sampler: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceAnimation {
    pub name: Option<String>,
    pub morph_weight_channels: Vec<MorphWeightChannel>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceGraph {
    /// Display name of the document, usually its file name.
    pub name: String,
    pub nodes: Vec<SourceNode>,
    pub skins: Vec<SourceSkin>,
    pub meshes: Vec<SourceMesh>,
    pub animations: Vec<SourceAnimation>,
    pub scene_roots: Vec<NodeId>,
}

impl SourceGraph {
    /// Read the document tables from a `.gltf` / `.glb` file.
    pub fn open(path: &Path) -> Result<Self> {
        let gltf = gltf::Gltf::open(path)
            .with_context(|| format!("failed to read glTF: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Self::from_document(&gltf.document, name))
    }

    pub fn from_document(document: &Document, name: String) -> Self {
        let nodes = document.nodes().map(convert_node).collect::<Vec<_>>();

        let skins = document
            .skins()
            .map(|skin| SourceSkin {
                name: skin.name().map(ToOwned::to_owned),
                joints: skin.joints().map(|joint| joint.index()).collect(),
                skeleton: skin.skeleton().map(|node| node.index()),
            })
            .collect();

        let meshes = document
            .meshes()
            .map(|mesh| SourceMesh {
                name: mesh.name().map(ToOwned::to_owned),
                morph_target_count: mesh
                    .primitives()
                    .next()
                    .map(|primitive| primitive.morph_targets().count())
                    .unwrap_or(0),
            })
            .collect();

        let animations = document
            .animations()
            .map(|animation| SourceAnimation {
                name: animation.name().map(ToOwned::to_owned),
                morph_weight_channels: animation
                    .channels()
                    .filter(|channel| channel.target().property() == Property::MorphTargetWeights)
                    .map(|channel| MorphWeightChannel {
                        node: channel.target().node().index(),
                        sampler: channel.sampler().index(),
                    })
                    .collect(),
            })
            .collect();

        let scene_roots = document
            .default_scene()
            .or_else(|| document.scenes().next())
            .map(|scene| scene.nodes().map(|node| node.index()).collect())
            .unwrap_or_else(|| parentless_nodes(&nodes));

        Self {
            name,
            nodes,
            skins,
            meshes,
            animations,
            scene_roots,
        }
    }

    pub fn node_name(&self, node: NodeId) -> String {
        self.nodes
            .get(node)
            .and_then(|node| node.name.clone())
            .unwrap_or_else(|| format!("nodes[{node}]"))
    }
}

fn convert_node(node: gltf::Node) -> SourceNode {
    let transform = match node.transform() {
        Transform::Matrix { matrix } => {
            SourceTransform::Matrix(Matrix4::from_fn(|row, column| matrix[column][row]))
        }
        Transform::Decomposed {
            translation,
            rotation,
            scale,
        } => SourceTransform::Trs(Trs {
            translation: Vector3::from(translation),
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(
                rotation[3],
                rotation[0],
                rotation[1],
                rotation[2],
            )),
            scale: Vector3::from(scale),
        }),
    };

    let mesh = node.mesh().map(|mesh| MeshInstance {
        mesh: mesh.index(),
        primitive: None,
        skin: node.skin().map(|skin| skin.index()),
        weights: node
            .weights()
            .or_else(|| mesh.weights())
            .map(|weights| weights.to_vec())
            .unwrap_or_default(),
    });

    SourceNode {
        name: node.name().map(ToOwned::to_owned),
        children: node.children().map(|child| child.index()).collect(),
        transform,
        mesh,
        camera: node.camera().map(|camera| camera.index()),
        light: node.light().map(|light| light.index()),
    }
}

fn parentless_nodes(nodes: &[SourceNode]) -> Vec<NodeId> {
    let mut has_parent = vec![false; nodes.len()];
    for node in nodes {
        for &child in &node.children {
            if let Some(flag) = has_parent.get_mut(child) {
                *flag = true;
            }
        }
    }
    (0..nodes.len()).filter(|&index| !has_parent[index]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKINNED_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [ { "nodes": [0, 3] } ],
        "nodes": [
            { "name": "hips", "children": [1], "translation": [0, 1, 0] },
            { "name": "spine", "children": [2], "rotation": [0, 0, 0.7071068, 0.7071068] },
            { "name": "head", "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0.5,0,1] },
            { "name": "body", "mesh": 0, "skin": 0, "weights": [0.25] }
        ],
        "meshes": [ { "name": "Body", "weights": [0.0], "primitives": [
            { "attributes": { "POSITION": 0 }, "targets": [ { "POSITION": 0 } ] }
        ] } ],
        "skins": [ { "joints": [0, 1, 2], "skeleton": 0 } ],
        "accessors": [ { "componentType": 5126, "count": 3, "type": "VEC3",
                         "min": [0, 0, 0], "max": [1, 1, 1] } ]
    }"#;

    fn load(json: &str) -> SourceGraph {
        let gltf = gltf::Gltf::from_slice_without_validation(json.as_bytes())
            .expect("test document should parse");
        SourceGraph::from_document(&gltf.document, "test.gltf".to_string())
    }

    #[test]
    fn given_skinned_document_when_converting_then_tables_are_copied() {
        let graph = load(SKINNED_GLTF);

        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.scene_roots, vec![0, 3]);
        assert_eq!(graph.skins[0].joints, vec![0, 1, 2]);
        assert_eq!(graph.skins[0].skeleton, Some(0));
        assert_eq!(graph.meshes[0].morph_target_count, 1);

        let body = graph.nodes[3].mesh.as_ref().expect("body carries a mesh");
        assert_eq!(body.skin, Some(0));
        assert_eq!(body.weights, vec![0.25]);
    }

    #[test]
    fn given_matrix_node_when_converting_then_column_major_translation_is_read() {
        let graph = load(SKINNED_GLTF);

        let trs = graph.nodes[2].transform.to_trs();
        assert!((trs.translation - Vector3::new(0.0, 0.5, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn given_quaternion_node_when_converting_then_xyzw_order_is_respected() {
        let graph = load(SKINNED_GLTF);

        let trs = graph.nodes[1].transform.to_trs();
        let expected =
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f32::consts::FRAC_PI_2);
        assert!(trs.rotation.angle_to(&expected) < 1e-4);
    }

    #[test]
    fn given_nodes_without_scene_when_collecting_roots_then_parentless_nodes_are_used() {
        let nodes = vec![
            SourceNode {
                children: vec![1],
                ..SourceNode::default()
            },
            SourceNode::default(),
            SourceNode::default(),
        ];

        assert_eq!(parentless_nodes(&nodes), vec![0, 2]);
    }
}
