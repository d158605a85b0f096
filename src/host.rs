//! Services the importer needs from the scene container it writes into.
//!
//! The container owns every entity and data block; the importer only keeps the
//! opaque handles it is given back.

use std::fmt;

use nalgebra::Vector3;
use serde::Serialize;

use crate::{
    error::HostError,
    transform::{EditBone, Trs},
};

/// Opaque handle to an object owned by the host scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityHandle(pub u64);

/// Opaque handle to a leaf data block (mesh geometry, camera, light).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DataHandle(pub u64);

/// Opaque handle to an animation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ActionHandle(pub u64);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Leaf data to fetch or create for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafRequest {
    Mesh { mesh: usize, primitive: Option<usize> },
    Camera(usize),
    Light(usize),
}

/// A freshly created entity together with the unique name the host gave it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub entity: EntityHandle,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransformSpace {
    Local,
    World,
}

/// Render engine of the active scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenderEngine {
    /// Old rasterizer that cannot display the materials this importer produces.
    Legacy,
    Realtime,
    PathTraced,
}

/// Bone creation request; the host never auto-connects the head to the parent tail.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneSpec<'a> {
    pub name: &'a str,
    pub edit_bone: EditBone,
    pub parent: Option<&'a str>,
}

/// Target container for realization.
///
/// Errors returned from any method abort the whole import.
pub trait SceneHost {
    /// Fetch or create the data block for a mesh, camera or light.
    fn leaf_data(&mut self, request: LeafRequest) -> Result<DataHandle, HostError>;

    /// Whether the data block carries a shape-key container at all.
    fn has_shape_keys(&self, data: DataHandle) -> bool;

    /// Set a shape key value; returns `false` when no key of that name exists.
    fn set_shape_key_value(
        &mut self,
        data: DataHandle,
        key: &str,
        value: f32,
    ) -> Result<bool, HostError>;

    fn create_object(&mut self, name: &str, data: Option<DataHandle>)
    -> Result<Created, HostError>;

    /// Create an armature object at the origin. Some hosts add it to the
    /// active scene right away, others leave it unlinked; callers check
    /// [`SceneHost::scene_contains`] rather than assume either.
    fn create_armature(&mut self, name: &str) -> Result<Created, HostError>;

    fn set_transform(&mut self, entity: EntityHandle, trs: &Trs) -> Result<(), HostError>;

    fn set_parent(&mut self, child: EntityHandle, parent: EntityHandle) -> Result<(), HostError>;

    /// Parent `child` to bone `bone` of `armature`.
    fn set_parent_bone(
        &mut self,
        child: EntityHandle,
        armature: EntityHandle,
        bone: &str,
    ) -> Result<(), HostError>;

    /// Enter skeletal edit mode on `armature`. Only one armature may be in edit
    /// mode at a time.
    fn enter_edit_mode(&mut self, armature: EntityHandle) -> Result<(), HostError>;

    fn exit_edit_mode(&mut self) -> Result<(), HostError>;

    /// Create a bone in the armature currently in edit mode; returns the
    /// bone's unique name.
    fn create_bone(&mut self, armature: EntityHandle, bone: BoneSpec<'_>)
    -> Result<String, HostError>;

    fn add_vertex_group(&mut self, object: EntityHandle, name: &str) -> Result<(), HostError>;

    fn add_armature_modifier(
        &mut self,
        object: EntityHandle,
        armature: EntityHandle,
        use_vertex_groups: bool,
    ) -> Result<(), HostError>;

    fn add_copy_transforms_constraint(
        &mut self,
        object: EntityHandle,
        target: EntityHandle,
        space: TransformSpace,
    ) -> Result<(), HostError>;

    fn set_pose_bone_scale(
        &mut self,
        armature: EntityHandle,
        bone: &str,
        scale: Vector3<f32>,
    ) -> Result<(), HostError>;

    fn scene_contains(&self, entity: EntityHandle) -> bool;

    fn link_to_scene(&mut self, entity: EntityHandle) -> Result<(), HostError>;

    fn unlink_from_scene(&mut self, entity: EntityHandle) -> Result<(), HostError>;

    fn render_engine(&self) -> RenderEngine;

    fn set_render_engine(&mut self, engine: RenderEngine) -> Result<(), HostError>;
}

/// What an action animates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionTarget {
    Object,
    ShapeKeys,
}

/// Animation services used when binding sampled channels to realized objects.
///
/// Keyframe construction from sampler data is entirely the host's concern.
pub trait AnimationHost {
    /// Data block instantiated by `object`, if any.
    fn object_data(&self, object: EntityHandle) -> Option<DataHandle>;

    fn create_action(&mut self, name: &str, target: ActionTarget)
    -> Result<ActionHandle, HostError>;

    /// Build one curve per `(data_path, array_index)` pair from sampler `sampler`
    /// of animation `animation`.
    fn make_fcurves(
        &mut self,
        action: ActionHandle,
        animation: usize,
        sampler: usize,
        data_paths: &[(String, usize)],
    ) -> Result<(), HostError>;
}
