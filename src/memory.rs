//! A [`SceneHost`] that keeps everything in plain collections.
//!
//! Used by the command-line dry run and by tests to observe exactly what the
//! importer asked the host to do.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use nalgebra::Vector3;
use serde::Serialize;

use crate::{
    error::HostError,
    host::{
        ActionHandle, ActionTarget, AnimationHost, BoneSpec, Created, DataHandle, EntityHandle,
        LeafRequest, RenderEngine, SceneHost, TransformSpace,
    },
    transform::{EditBone, Trs},
};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryObject {
    pub name: String,
    pub is_armature: bool,
    pub data: Option<DataHandle>,
    pub trs: Trs,
    pub parent: Option<EntityHandle>,
    /// Armature and bone name when parented to a bone.
    pub bone_parent: Option<(EntityHandle, String)>,
    pub vertex_groups: Vec<String>,
    pub armature_modifiers: Vec<(EntityHandle, bool)>,
    pub copy_transforms: Vec<(EntityHandle, TransformSpace)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBone {
    pub name: String,
    pub parent: Option<String>,
    pub edit_bone: EditBone,
    pub created_in_edit_mode: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryData {
    pub request: LeafRequest,
    /// `None` when the data block has no shape-key container.
    pub shape_keys: Option<BTreeMap<String, f32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryFCurves {
    pub animation: usize,
    pub sampler: usize,
    pub data_paths: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryAction {
    pub name: String,
    pub target: ActionTarget,
    pub fcurves: Vec<MemoryFCurves>,
}

#[derive(Debug, Clone)]
pub struct MemoryScene {
    objects: BTreeMap<EntityHandle, MemoryObject>,
    bones: HashMap<EntityHandle, Vec<MemoryBone>>,
    pose_scales: HashMap<(EntityHandle, String), Vector3<f32>>,
    data: Vec<MemoryData>,
    data_by_request: HashMap<LeafRequest, DataHandle>,
    shape_key_counts: HashMap<usize, usize>,
    actions: Vec<MemoryAction>,
    linked: BTreeSet<EntityHandle>,
    edit_mode: Option<EntityHandle>,
    edit_mode_log: Vec<(EntityHandle, bool)>,
    render_engine: RenderEngine,
    fail_on: Option<String>,
    link_new_armatures: bool,
    next_entity: u64,
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

/// Blender-style unique name: `name`, then `name.001`, `name.002`, ...
pub fn unique_name<'a>(base: &str, taken: impl Iterator<Item = &'a str> + Clone) -> String {
    let in_use = |candidate: &str| taken.clone().any(|name| name == candidate);
    if !in_use(base) {
        return base.to_string();
    }
    (1u32..)
        .map(|suffix| format!("{base}.{suffix:03}"))
        .find(|candidate| !in_use(candidate))
        .unwrap_or_else(|| base.to_string())
}

impl MemoryScene {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            bones: HashMap::new(),
            pose_scales: HashMap::new(),
            data: Vec::new(),
            data_by_request: HashMap::new(),
            shape_key_counts: HashMap::new(),
            actions: Vec::new(),
            linked: BTreeSet::new(),
            edit_mode: None,
            edit_mode_log: Vec::new(),
            render_engine: RenderEngine::Realtime,
            fail_on: None,
            link_new_armatures: true,
            next_entity: 1,
        }
    }

    /// Give data created for `mesh` a shape-key container with keys
    /// `Morph 0` .. `Morph {count - 1}`.
    pub fn define_shape_keys(&mut self, mesh: usize, count: usize) {
        self.shape_key_counts.insert(mesh, count);
    }

    /// Make every creation request for an entity or bone called `name` fail.
    pub fn fail_on(&mut self, name: &str) {
        self.fail_on = Some(name.to_string());
    }

    /// Whether new armatures start out linked into the scene. On by default.
    pub fn link_new_armatures(&mut self, link: bool) {
        self.link_new_armatures = link;
    }

    pub fn object(&self, entity: EntityHandle) -> Option<&MemoryObject> {
        self.objects.get(&entity)
    }

    pub fn objects(&self) -> impl Iterator<Item = (EntityHandle, &MemoryObject)> {
        self.objects.iter().map(|(entity, object)| (*entity, object))
    }

    pub fn bones(&self, armature: EntityHandle) -> &[MemoryBone] {
        self.bones
            .get(&armature)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn pose_scale(&self, armature: EntityHandle, bone: &str) -> Option<Vector3<f32>> {
        self.pose_scales
            .get(&(armature, bone.to_string()))
            .copied()
    }

    pub fn data(&self, data: DataHandle) -> Option<&MemoryData> {
        self.data.get(data.0 as usize)
    }

    pub fn shape_key_value(&self, data: DataHandle, key: &str) -> Option<f32> {
        self.data(data)?.shape_keys.as_ref()?.get(key).copied()
    }

    pub fn actions(&self) -> &[MemoryAction] {
        &self.actions
    }

    pub fn edit_mode(&self) -> Option<EntityHandle> {
        self.edit_mode
    }

    /// Every edit-mode transition in order: `(armature, entered)`.
    pub fn edit_mode_log(&self) -> &[(EntityHandle, bool)] {
        &self.edit_mode_log
    }

    pub fn linked_count(&self) -> usize {
        self.linked.len()
    }

    fn check_failure(&self, kind: &'static str, name: &str) -> Result<(), HostError> {
        if self.fail_on.as_deref() == Some(name) {
            return Err(HostError::Create {
                kind,
                name: name.to_string(),
                reason: "failure injected".to_string(),
            });
        }
        Ok(())
    }

    fn object_mut(&mut self, entity: EntityHandle) -> Result<&mut MemoryObject, HostError> {
        self.objects
            .get_mut(&entity)
            .ok_or(HostError::UnknownEntity(entity.0))
    }

    fn insert_object(
        &mut self,
        name: &str,
        data: Option<DataHandle>,
        is_armature: bool,
    ) -> Created {
        let unique = unique_name(
            name,
            self.objects.values().map(|object| object.name.as_str()),
        );
        let entity = EntityHandle(self.next_entity);
        self.next_entity += 1;
        self.objects.insert(
            entity,
            MemoryObject {
                name: unique.clone(),
                is_armature,
                data,
                trs: Trs::identity(),
                parent: None,
                bone_parent: None,
                vertex_groups: Vec::new(),
                armature_modifiers: Vec::new(),
                copy_transforms: Vec::new(),
            },
        );
        Created {
            entity,
            name: unique,
        }
    }
}

impl SceneHost for MemoryScene {
    fn leaf_data(&mut self, request: LeafRequest) -> Result<DataHandle, HostError> {
        if let Some(data) = self.data_by_request.get(&request) {
            return Ok(*data);
        }
        let shape_keys: Option<BTreeMap<String, f32>> = match request {
            LeafRequest::Mesh { mesh, .. } => self.shape_key_counts.get(&mesh).map(|&count| {
                (0..count)
                    .map(|index| (format!("Morph {index}"), 0.0))
                    .collect()
            }),
            LeafRequest::Camera(_) | LeafRequest::Light(_) => None,
        };
        let handle = DataHandle(self.data.len() as u64);
        self.data.push(MemoryData {
            request,
            shape_keys,
        });
        self.data_by_request.insert(request, handle);
        Ok(handle)
    }

    fn has_shape_keys(&self, data: DataHandle) -> bool {
        self.data(data)
            .is_some_and(|data| data.shape_keys.is_some())
    }

    fn set_shape_key_value(
        &mut self,
        data: DataHandle,
        key: &str,
        value: f32,
    ) -> Result<bool, HostError> {
        let record = self
            .data
            .get_mut(data.0 as usize)
            .ok_or(HostError::UnknownData(data.0))?;
        match record
            .shape_keys
            .as_mut()
            .and_then(|keys| keys.get_mut(key))
        {
            Some(slot) => {
                *slot = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn create_object(
        &mut self,
        name: &str,
        data: Option<DataHandle>,
    ) -> Result<Created, HostError> {
        self.check_failure("object", name)?;
        if let Some(data) = data
            && self.data(data).is_none()
        {
            return Err(HostError::UnknownData(data.0));
        }
        Ok(self.insert_object(name, data, false))
    }

    fn create_armature(&mut self, name: &str) -> Result<Created, HostError> {
        self.check_failure("armature", name)?;
        let created = self.insert_object(name, None, true);
        if self.link_new_armatures {
            self.linked.insert(created.entity);
        }
        self.bones.insert(created.entity, Vec::new());
        Ok(created)
    }

    fn set_transform(&mut self, entity: EntityHandle, trs: &Trs) -> Result<(), HostError> {
        self.object_mut(entity)?.trs = *trs;
        Ok(())
    }

    fn set_parent(&mut self, child: EntityHandle, parent: EntityHandle) -> Result<(), HostError> {
        if !self.objects.contains_key(&parent) {
            return Err(HostError::UnknownEntity(parent.0));
        }
        let object = self.object_mut(child)?;
        object.parent = Some(parent);
        object.bone_parent = None;
        Ok(())
    }

    fn set_parent_bone(
        &mut self,
        child: EntityHandle,
        armature: EntityHandle,
        bone: &str,
    ) -> Result<(), HostError> {
        if !self.bones(armature).iter().any(|existing| existing.name == bone) {
            return Err(HostError::Other(format!(
                "armature {armature} has no bone '{bone}'"
            )));
        }
        let object = self.object_mut(child)?;
        object.parent = Some(armature);
        object.bone_parent = Some((armature, bone.to_string()));
        Ok(())
    }

    fn enter_edit_mode(&mut self, armature: EntityHandle) -> Result<(), HostError> {
        if let Some(active) = self.edit_mode {
            return Err(HostError::EditModeActive(active.0));
        }
        if !self.bones.contains_key(&armature) {
            return Err(HostError::UnknownEntity(armature.0));
        }
        self.edit_mode = Some(armature);
        self.edit_mode_log.push((armature, true));
        Ok(())
    }

    fn exit_edit_mode(&mut self) -> Result<(), HostError> {
        let armature = self.edit_mode.take().ok_or(HostError::EditModeInactive)?;
        self.edit_mode_log.push((armature, false));
        Ok(())
    }

    fn create_bone(
        &mut self,
        armature: EntityHandle,
        bone: BoneSpec<'_>,
    ) -> Result<String, HostError> {
        self.check_failure("bone", bone.name)?;
        if self.edit_mode != Some(armature) {
            return Err(HostError::EditModeInactive);
        }
        let bones = self
            .bones
            .get_mut(&armature)
            .ok_or(HostError::UnknownEntity(armature.0))?;
        if let Some(parent) = bone.parent
            && !bones.iter().any(|existing| existing.name == parent)
        {
            return Err(HostError::Other(format!("parent bone '{parent}' does not exist")));
        }

        let name = unique_name(bone.name, bones.iter().map(|existing| existing.name.as_str()));
        bones.push(MemoryBone {
            name: name.clone(),
            parent: bone.parent.map(ToOwned::to_owned),
            edit_bone: bone.edit_bone,
            created_in_edit_mode: true,
        });
        Ok(name)
    }

    fn add_vertex_group(&mut self, object: EntityHandle, name: &str) -> Result<(), HostError> {
        self.object_mut(object)?.vertex_groups.push(name.to_string());
        Ok(())
    }

    fn add_armature_modifier(
        &mut self,
        object: EntityHandle,
        armature: EntityHandle,
        use_vertex_groups: bool,
    ) -> Result<(), HostError> {
        self.object_mut(object)?
            .armature_modifiers
            .push((armature, use_vertex_groups));
        Ok(())
    }

    fn add_copy_transforms_constraint(
        &mut self,
        object: EntityHandle,
        target: EntityHandle,
        space: TransformSpace,
    ) -> Result<(), HostError> {
        self.object_mut(object)?.copy_transforms.push((target, space));
        Ok(())
    }

    fn set_pose_bone_scale(
        &mut self,
        armature: EntityHandle,
        bone: &str,
        scale: Vector3<f32>,
    ) -> Result<(), HostError> {
        if !self.bones(armature).iter().any(|existing| existing.name == bone) {
            return Err(HostError::Other(format!(
                "armature {armature} has no pose bone '{bone}'"
            )));
        }
        self.pose_scales.insert((armature, bone.to_string()), scale);
        Ok(())
    }

    fn scene_contains(&self, entity: EntityHandle) -> bool {
        self.linked.contains(&entity)
    }

    fn link_to_scene(&mut self, entity: EntityHandle) -> Result<(), HostError> {
        if !self.objects.contains_key(&entity) {
            return Err(HostError::UnknownEntity(entity.0));
        }
        if !self.linked.insert(entity) {
            return Err(HostError::Other(format!(
                "object {entity} is already in the scene"
            )));
        }
        Ok(())
    }

    fn unlink_from_scene(&mut self, entity: EntityHandle) -> Result<(), HostError> {
        if !self.linked.remove(&entity) {
            return Err(HostError::Other(format!("object {entity} is not in the scene")));
        }
        Ok(())
    }

    fn render_engine(&self) -> RenderEngine {
        self.render_engine
    }

    fn set_render_engine(&mut self, engine: RenderEngine) -> Result<(), HostError> {
        self.render_engine = engine;
        Ok(())
    }
}

impl AnimationHost for MemoryScene {
    fn object_data(&self, object: EntityHandle) -> Option<DataHandle> {
        self.objects.get(&object).and_then(|object| object.data)
    }

    fn create_action(
        &mut self,
        name: &str,
        target: ActionTarget,
    ) -> Result<ActionHandle, HostError> {
        let unique = unique_name(name, self.actions.iter().map(|action| action.name.as_str()));
        self.actions.push(MemoryAction {
            name: unique,
            target,
            fcurves: Vec::new(),
        });
        Ok(ActionHandle(self.actions.len() as u64 - 1))
    }

    fn make_fcurves(
        &mut self,
        action: ActionHandle,
        animation: usize,
        sampler: usize,
        data_paths: &[(String, usize)],
    ) -> Result<(), HostError> {
        let record = self
            .actions
            .get_mut(action.0 as usize)
            .ok_or_else(|| HostError::Other(format!("unknown action {}", action.0)))?;
        record.fcurves.push(MemoryFCurves {
            animation,
            sampler,
            data_paths: data_paths.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_taken_names_when_uniquifying_then_numeric_suffix_is_appended() {
        let taken = ["Cube", "Cube.001"];

        assert_eq!(unique_name("Sphere", taken.iter().copied()), "Sphere");
        assert_eq!(unique_name("Cube", taken.iter().copied()), "Cube.002");
    }

    #[test]
    fn given_duplicate_object_names_when_creating_then_host_renames() {
        let mut scene = MemoryScene::new();

        let first = scene.create_object("joint", None).expect("first");
        let second = scene.create_object("joint", None).expect("second");

        assert_eq!(first.name, "joint");
        assert_eq!(second.name, "joint.001");
        assert_ne!(first.entity, second.entity);
    }

    #[test]
    fn given_no_edit_mode_when_creating_bone_then_error_is_returned() {
        let mut scene = MemoryScene::new();
        let armature = scene.create_armature("Armature").expect("armature").entity;
        let spec = BoneSpec {
            name: "hips",
            edit_bone: EditBone {
                head: Vector3::zeros(),
                tail: Vector3::y(),
                roll_axis: Vector3::z(),
            },
            parent: None,
        };

        assert_eq!(
            scene.create_bone(armature, spec),
            Err(HostError::EditModeInactive)
        );
    }

    #[test]
    fn given_linked_object_when_linking_again_then_duplicate_link_is_rejected() {
        let mut scene = MemoryScene::new();
        let object = scene.create_object("lamp", None).expect("object").entity;

        scene.link_to_scene(object).expect("first link");

        assert!(scene.link_to_scene(object).is_err());
        assert_eq!(scene.linked_count(), 1);
    }

    #[test]
    fn given_defined_shape_keys_when_setting_values_then_only_known_keys_change() {
        let mut scene = MemoryScene::new();
        scene.define_shape_keys(0, 2);
        let data = scene
            .leaf_data(LeafRequest::Mesh {
                mesh: 0,
                primitive: None,
            })
            .expect("mesh data");

        assert!(scene.has_shape_keys(data));
        assert_eq!(scene.set_shape_key_value(data, "Morph 1", 0.5), Ok(true));
        assert_eq!(scene.set_shape_key_value(data, "Morph 7", 0.5), Ok(false));
        assert_eq!(scene.shape_key_value(data, "Morph 1"), Some(0.5));
    }
}
