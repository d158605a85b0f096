use thiserror::Error;

use crate::source::NodeId;

/// Structural problems found while turning the source graph into a vnode tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {node} is its own ancestor")]
    Cycle { node: NodeId },

    #[error("skin {skin} references joint node {joint}, which does not exist")]
    DanglingJoint { skin: usize, joint: NodeId },

    #[error("node {parent} lists child {child}, which does not exist")]
    DanglingChild { parent: NodeId, child: NodeId },

    #[error("scene root {node} does not exist")]
    DanglingRoot { node: NodeId },

    #[error("node {node} instances a mesh skinned by skin {skin}, which does not exist")]
    DanglingSkin { node: NodeId, skin: usize },

    #[error("node {child} is a child of both node {first} and node {second}")]
    SharedChild {
        child: NodeId,
        first: NodeId,
        second: NodeId,
    },

    #[error("skin {skin} declares skeleton node {skeleton}, which is not an ancestor of joint {joint}")]
    AmbiguousSplit {
        skin: usize,
        skeleton: NodeId,
        joint: NodeId,
    },

    #[error("vnode tree invariant violated: {0}")]
    Invariant(String),
}

/// Failure reported by the scene host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{kind} '{name}' could not be created: {reason}")]
    Create {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("unknown entity {0}")]
    UnknownEntity(u64),

    #[error("unknown data block {0}")]
    UnknownData(u64),

    #[error("edit mode is already active for entity {0}")]
    EditModeActive(u64),

    #[error("edit mode is not active")]
    EditModeInactive,

    #[error("{0}")]
    Other(String),
}

/// Failures while instantiating the vnode tree in the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealizationError {
    #[error("failed to create entity for vnode '{vnode}'")]
    EntityCreateFailed {
        vnode: String,
        #[source]
        source: HostError,
    },

    #[error("vnode '{vnode}' was not realized before {phase}")]
    Unrealized { vnode: String, phase: &'static str },

    #[error("joint '{vnode}' has no realized armature owner")]
    MissingArmatureOwner { vnode: String },

    #[error("edit mode transition failed")]
    EditMode(#[source] HostError),

    #[error("failed to update scene membership of vnode '{vnode}'")]
    SceneLink {
        vnode: String,
        #[source]
        source: HostError,
    },

    #[error("failed to switch the scene render engine")]
    RenderEngine(#[source] HostError),
}

/// Umbrella error returned by [`crate::import::import_scene`].
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("invalid import options: {0}")]
    Options(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Realization(#[from] RealizationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_create_failure_when_formatted_then_vnode_name_is_included() {
        let error = RealizationError::EntityCreateFailed {
            vnode: "Armature".to_string(),
            source: HostError::Other("out of memory".to_string()),
        };

        let message = error.to_string();
        assert!(message.contains("Armature"));
        assert_eq!(
            std::error::Error::source(&error).map(|source| source.to_string()),
            Some("out of memory".to_string())
        );
    }

    #[test]
    fn given_graph_error_when_converted_then_import_error_keeps_message() {
        let error: ImportError = GraphError::Cycle { node: 3 }.into();
        assert_eq!(error.to_string(), "node 3 is its own ancestor");
    }
}
