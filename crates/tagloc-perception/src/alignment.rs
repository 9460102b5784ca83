//! Pose averaging and rigid alignment.
//!
//! Origin observations are averaged component-wise: the mean of several
//! rotation matrices is generally not a rotation, so the mean is projected
//! back onto SO(3) with the SVD-based orthogonal Procrustes (Kabsch) step.
//!
//! Given `M = U Σ Vᵗ`, the nearest proper rotation in the Frobenius sense is
//! `U D Vᵗ` with `D = diag(1, 1, sign(det(U Vᵗ)))`. The camera needs the
//! inverse of the origin's orientation, so [`align`] returns the transpose,
//! `V D Uᵗ`, directly.
//!
//! ```rust
//! use nalgebra::{Matrix3, Vector3};
//! use tagloc_perception::alignment::{camera_pose, Observation, average};
//!
//! let obs = [
//!     Observation::new(Matrix3::identity(), Vector3::new(0.0, 0.0, 0.0)),
//!     Observation::new(Matrix3::identity(), Vector3::new(2.0, 0.0, 0.0)),
//! ];
//! let (rot, trans) = average(&obs).unwrap();
//! let pose = camera_pose(&rot, &trans);
//! assert!((pose.translation.vector.x + 1.0).abs() < 1e-12);
//! ```

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// One origin-marker observation in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl Observation {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Split an isometry into its rotation matrix and translation.
    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self::new(
            iso.rotation.to_rotation_matrix().into_inner(),
            iso.translation.vector,
        )
    }
}

/// Element-wise mean rotation matrix and mean translation.
///
/// Returns `None` for an empty input.
pub fn average<'a, I>(observations: I) -> Option<(Matrix3<f64>, Vector3<f64>)>
where
    I: IntoIterator<Item = &'a Observation>,
{
    let mut count = 0usize;
    let mut rot_sum = Matrix3::zeros();
    let mut trans_sum = Vector3::zeros();
    for obs in observations {
        rot_sum += obs.rotation;
        trans_sum += obs.translation;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some((rot_sum / n, trans_sum / n))
}

/// Inverse of the proper rotation nearest to `mean_rotation`: `V D Uᵗ`.
///
/// Defined for every real 3×3 input, including zero and rank-deficient
/// matrices; the result always has determinant +1. For a proper rotation
/// `R`, `align(R) == Rᵗ`: the camera pose needs the inverse of the averaged
/// origin rotation.
pub fn align(mean_rotation: &Matrix3<f64>) -> Rotation3<f64> {
    let svd = mean_rotation.svd(true, true);
    // Both factors are requested above, so these are always present.
    let u = svd.u.unwrap_or_else(Matrix3::identity);
    let v = svd.v_t.unwrap_or_else(Matrix3::identity).transpose();

    let mut correction = Matrix3::identity();
    if (v * u.transpose()).determinant() <= 0.0 {
        correction[(2, 2)] = -1.0;
    }
    Rotation3::from_matrix_unchecked(v * correction * u.transpose())
}

/// The proper rotation nearest to `m` (Frobenius norm): `U D Vᵗ`.
///
/// Idempotent: a matrix that already is a proper rotation comes back unchanged.
pub fn nearest_rotation(m: &Matrix3<f64>) -> Rotation3<f64> {
    align(m).inverse()
}

/// Camera pose in the origin frame from the averaged origin observation.
///
/// Rotation is [`align`]`(mean_rotation)`, translation is that rotation applied
/// to `-mean_translation`.
pub fn camera_pose(mean_rotation: &Matrix3<f64>, mean_translation: &Vector3<f64>) -> Isometry3<f64> {
    let rotation = UnitQuaternion::from_rotation_matrix(&align(mean_rotation));
    let translation = rotation * (-*mean_translation);
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-9;

    fn assert_proper(r: &Rotation3<f64>) {
        let m = r.matrix();
        assert_relative_eq!(m.transpose() * m, Matrix3::identity(), epsilon = EPS);
        assert_relative_eq!(m.determinant(), 1.0, epsilon = EPS);
    }

    fn yaw(angle: f64) -> Matrix3<f64> {
        Rotation3::from_axis_angle(&Vector3::z_axis(), angle).into_inner()
    }

    #[test]
    fn average_of_nothing_is_none() {
        let empty: [Observation; 0] = [];
        assert!(average(&empty).is_none());
    }

    #[test]
    fn average_is_element_wise_mean() {
        let obs = [
            Observation::new(Matrix3::identity(), Vector3::new(0.0, 0.0, 0.0)),
            Observation::new(Matrix3::identity(), Vector3::new(2.0, 0.0, 0.0)),
            Observation::new(Matrix3::identity(), Vector3::new(4.0, 0.0, 0.0)),
        ];
        let (rot, trans) = average(&obs).unwrap();
        assert_relative_eq!(rot, Matrix3::identity(), epsilon = EPS);
        assert_relative_eq!(trans, Vector3::new(2.0, 0.0, 0.0), epsilon = EPS);
    }

    #[test]
    fn average_of_rotations_is_not_orthonormal() {
        let obs = [
            Observation::new(yaw(0.0), Vector3::zeros()),
            Observation::new(yaw(FRAC_PI_2), Vector3::zeros()),
        ];
        let (rot, _) = average(&obs).unwrap();
        // Columns shrink below unit length.
        assert!(rot.column(0).norm() < 0.99);
        // Projection recovers the 45° yaw.
        let r = nearest_rotation(&rot);
        assert_relative_eq!(r.into_inner(), yaw(FRAC_PI_2 / 2.0), epsilon = EPS);
    }

    #[test]
    fn align_of_identity_is_identity() {
        let r = align(&Matrix3::identity());
        assert_relative_eq!(r.into_inner(), Matrix3::identity(), epsilon = EPS);
    }

    #[test]
    fn align_inverts_a_proper_rotation() {
        let m = yaw(0.7);
        let r = align(&m);
        assert_relative_eq!(r.into_inner(), m.transpose(), epsilon = EPS);
    }

    #[test]
    fn nearest_rotation_is_idempotent_on_rotations() {
        let m = Rotation3::from_euler_angles(0.3, -1.1, 2.0).into_inner();
        let r = nearest_rotation(&m);
        assert_relative_eq!(r.into_inner(), m, epsilon = EPS);
    }

    #[test]
    fn proper_rotation_for_zero_matrix() {
        assert_proper(&align(&Matrix3::zeros()));
    }

    #[test]
    fn proper_rotation_for_rank_deficient_inputs() {
        let rank_one = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 3.0, 6.0, 9.0);
        let rank_two = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        assert_proper(&align(&rank_one));
        assert_proper(&align(&rank_two));
    }

    #[test]
    fn reflection_is_corrected() {
        let reflection = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        let r = align(&reflection);
        assert_proper(&r);
    }

    #[test]
    fn proper_rotation_for_arbitrary_matrices() {
        let inputs = [
            Matrix3::new(0.2, -1.3, 4.0, 7.1, 0.0, -0.5, 2.2, 3.3, -9.0),
            Matrix3::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0),
            Matrix3::new(1e-9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1e-9),
        ];
        for m in inputs {
            assert_proper(&align(&m));
            assert_proper(&nearest_rotation(&m));
        }
    }

    #[test]
    fn camera_pose_negates_translation_for_identity() {
        let pose = camera_pose(&Matrix3::identity(), &Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(pose.translation.vector, Vector3::new(-1.0, 0.0, 0.0), epsilon = EPS);
        assert_relative_eq!(pose.rotation.angle(), 0.0, epsilon = EPS);
    }

    #[test]
    fn camera_pose_is_inverse_of_origin_observation() {
        let origin_in_camera = Isometry3::new(Vector3::new(0.5, -1.0, 3.0), Vector3::new(0.1, 0.4, -0.2));
        let obs = Observation::from_isometry(&origin_in_camera);
        let pose = camera_pose(&obs.rotation, &obs.translation);
        let product = pose * origin_in_camera;
        assert_relative_eq!(product.translation.vector, Vector3::zeros(), epsilon = EPS);
        assert_relative_eq!(product.rotation.angle(), 0.0, epsilon = 1e-6);
    }
}
