use std::ops::{Deref, DerefMut};

use log::{debug, warn};

use crate::{
    error::{HostError, RealizationError},
    host::{EntityHandle, SceneHost},
};

/// Skeletal edit mode held on one armature.
///
/// The scope borrows the host for as long as edit mode is active, so a second
/// armature cannot enter edit mode through the same host until this one is
/// released or dropped. Dropping without [`EditModeScope::release`] still
/// exits edit mode; a failure there can only be logged.
pub struct EditModeScope<'h, H: SceneHost + ?Sized> {
    host: &'h mut H,
    armature: EntityHandle,
    active: bool,
}

impl<'h, H: SceneHost + ?Sized> EditModeScope<'h, H> {
    pub fn enter(host: &'h mut H, armature: EntityHandle) -> Result<Self, RealizationError> {
        host.enter_edit_mode(armature)
            .map_err(RealizationError::EditMode)?;
        debug!("entered edit mode on armature {armature}");
        Ok(Self {
            host,
            armature,
            active: true,
        })
    }

    pub fn armature(&self) -> EntityHandle {
        self.armature
    }

    /// Leave edit mode, reporting a failure instead of swallowing it.
    pub fn release(mut self) -> Result<(), RealizationError> {
        self.active = false;
        self.exit().map_err(RealizationError::EditMode)
    }

    fn exit(&mut self) -> Result<(), HostError> {
        self.host.exit_edit_mode()?;
        debug!("left edit mode on armature {}", self.armature);
        Ok(())
    }
}

impl<H: SceneHost + ?Sized> Deref for EditModeScope<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.host
    }
}

impl<H: SceneHost + ?Sized> DerefMut for EditModeScope<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.host
    }
}

impl<H: SceneHost + ?Sized> Drop for EditModeScope<'_, H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(error) = self.exit() {
            warn!(
                "failed to leave edit mode on armature {} while unwinding: {error}",
                self.armature
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryScene;

    #[test]
    fn given_scope_when_released_then_edit_mode_ends_once() {
        let mut scene = MemoryScene::new();
        let armature = scene.create_armature("Armature").expect("armature").entity;

        let scope = EditModeScope::enter(&mut scene, armature).expect("enter");
        assert_eq!(scope.edit_mode(), Some(armature));
        scope.release().expect("release");

        assert_eq!(scene.edit_mode(), None);
        assert_eq!(scene.edit_mode_log(), &[(armature, true), (armature, false)]);
    }

    #[test]
    fn given_scope_when_dropped_early_then_edit_mode_is_still_left() {
        let mut scene = MemoryScene::new();
        let armature = scene.create_armature("Armature").expect("armature").entity;

        {
            let _scope = EditModeScope::enter(&mut scene, armature).expect("enter");
        }

        assert_eq!(scene.edit_mode(), None);
    }

    #[test]
    fn given_active_edit_mode_when_entering_again_then_error_is_returned() {
        let mut scene = MemoryScene::new();
        let first = scene.create_armature("A").expect("armature").entity;
        let second = scene.create_armature("B").expect("armature").entity;
        scene.enter_edit_mode(first).expect("first enter");

        let result = EditModeScope::enter(&mut scene, second);

        assert!(matches!(
            result.err(),
            Some(RealizationError::EditMode(HostError::EditModeActive(_)))
        ));
    }
}
