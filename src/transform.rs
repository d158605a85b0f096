use nalgebra::{Matrix3, Matrix4, Point3, Translation3, UnitQuaternion, Vector3};

/// Local translation / rotation / scale of a node relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trs {
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Default for Trs {
    fn default() -> Self {
        Self::identity()
    }
}

impl Trs {
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        let translation_matrix = Translation3::from(self.translation).to_homogeneous();
        let rotation_matrix = self.rotation.to_homogeneous();
        let scale_matrix = Matrix4::new_nonuniform_scaling(&self.scale);
        translation_matrix * rotation_matrix * scale_matrix
    }

    /// Decompose an affine matrix into TRS.
    ///
    /// Shear is discarded. A negative determinant is folded into the X scale so
    /// the rotation stays proper.
    pub fn from_matrix(matrix: &Matrix4<f32>) -> Self {
        let translation = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);

        let basis_x = Vector3::new(matrix[(0, 0)], matrix[(1, 0)], matrix[(2, 0)]);
        let basis_y = Vector3::new(matrix[(0, 1)], matrix[(1, 1)], matrix[(2, 1)]);
        let basis_z = Vector3::new(matrix[(0, 2)], matrix[(1, 2)], matrix[(2, 2)]);

        let mut scale_x = basis_x.norm();
        let scale_y = basis_y.norm();
        let scale_z = basis_z.norm();

        let mut rot_x = if scale_x > 1e-8 {
            basis_x / scale_x
        } else {
            Vector3::x()
        };
        let rot_y = if scale_y > 1e-8 {
            basis_y / scale_y
        } else {
            Vector3::y()
        };
        let rot_z = if scale_z > 1e-8 {
            basis_z / scale_z
        } else {
            Vector3::z()
        };

        if rot_x.cross(&rot_y).dot(&rot_z) < 0.0 {
            scale_x = -scale_x;
            rot_x = -rot_x;
        }

        let rotation_matrix = Matrix3::from_columns(&[rot_x, rot_y, rot_z]);
        Self {
            translation,
            rotation: UnitQuaternion::from_matrix(&rotation_matrix),
            scale: Vector3::new(scale_x, scale_y, scale_z),
        }
    }

    pub fn is_uniform_scale(&self, epsilon: f32) -> bool {
        let s = self.scale;
        (s.x - s.y).abs() <= epsilon && (s.y - s.z).abs() <= epsilon
    }

    pub fn without_scale(&self) -> Self {
        Self {
            scale: Vector3::new(1.0, 1.0, 1.0),
            ..*self
        }
    }
}

/// Head, tail and roll axis of a joint in its armature's space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditBone {
    pub head: Vector3<f32>,
    pub tail: Vector3<f32>,
    /// Direction the bone's local Z axis should be rolled towards.
    pub roll_axis: Vector3<f32>,
}

/// Joints are authored as head/tail/roll in armature space rather than as a
/// local-to-parent transform, so they are derived from the joint's
/// local-to-armature matrix applied to the canonical bone frame.
///
/// `bone_length` must already be clamped to a positive value by the caller.
pub fn resolve_edit_bone(local_to_armature: &Matrix4<f32>, bone_length: f32) -> EditBone {
    let head = local_to_armature.transform_point(&Point3::origin()).coords;
    let tail = local_to_armature
        .transform_point(&Point3::new(0.0, bone_length, 0.0))
        .coords;
    let up = local_to_armature
        .transform_point(&Point3::new(0.0, 0.0, 1.0))
        .coords;

    EditBone {
        head,
        tail,
        roll_axis: up - head,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_trs_when_converting_to_matrix_and_back_then_components_are_preserved() {
        let trs = Trs {
            translation: Vector3::new(1.0, -2.0, 0.5),
            rotation: UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1),
            scale: Vector3::new(2.0, 0.5, 1.5),
        };

        let restored = Trs::from_matrix(&trs.to_matrix());

        assert!((restored.translation - trs.translation).norm() < 1e-4);
        assert!(restored.rotation.angle_to(&trs.rotation) < 1e-4);
        assert!((restored.scale - trs.scale).norm() < 1e-4);
    }

    #[test]
    fn given_mirrored_matrix_when_decomposing_then_x_scale_is_negative() {
        let matrix = Matrix4::new_nonuniform_scaling(&Vector3::new(-1.0, 1.0, 1.0));

        let trs = Trs::from_matrix(&matrix);

        assert!(trs.scale.x < 0.0);
        assert!(trs.rotation.angle() < 1e-4);
    }

    #[test]
    fn given_identity_matrix_when_resolving_bone_then_bone_points_along_y() {
        let bone = resolve_edit_bone(&Matrix4::identity(), 2.0);

        assert!((bone.head - Vector3::zeros()).norm() < 1e-6);
        assert!((bone.tail - Vector3::new(0.0, 2.0, 0.0)).norm() < 1e-6);
        assert!((bone.roll_axis - Vector3::z()).norm() < 1e-6);
    }

    #[test]
    fn given_translated_and_rotated_joint_when_resolving_then_roll_is_relative_to_head() {
        let trs = Trs {
            translation: Vector3::new(0.0, 1.0, 0.0),
            rotation: UnitQuaternion::from_axis_angle(
                &Vector3::z_axis(),
                std::f32::consts::FRAC_PI_2,
            ),
            scale: Vector3::new(1.0, 1.0, 1.0),
        };

        let bone = resolve_edit_bone(&trs.to_matrix(), 1.0);

        assert!((bone.head - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-5);
        assert!((bone.tail - Vector3::new(-1.0, 1.0, 0.0)).norm() < 1e-5);
        assert!((bone.roll_axis - Vector3::z()).norm() < 1e-5);
    }

    #[test]
    fn given_scales_when_checking_uniformity_then_epsilon_is_respected() {
        let mut trs = Trs::identity();
        trs.scale = Vector3::new(2.0, 2.0, 2.00001);
        assert!(trs.is_uniform_scale(1e-4));

        trs.scale = Vector3::new(1.0, 2.0, 1.0);
        assert!(!trs.is_uniform_scale(1e-4));
        assert_eq!(trs.without_scale().scale, Vector3::new(1.0, 1.0, 1.0));
    }
}
