use nalgebra::{
    Isometry3, Matrix3, Matrix4, Quaternion, Translation3, UnitQuaternion, UnitVector3,
    Vector3, Vector6,
};

use std::ops;

pub enum LieGroup {
    Se3(Vector6<f32>),
    So3(Vector3<f32>),
}

/// A rigid body transform in 3D space.
/// Wraps `Isometry3` from nalgebra and provides the SE(3) exp/log helpers
/// the pose aligner and graph optimizer build on.
#[derive(Clone, Debug)]
pub struct Transform(pub Isometry3<f32>);

impl Default for Transform {
    /// Create a new transform with zero translation and zero rotation.
    fn default() -> Self {
        Self::eye()
    }
}

impl Transform {
    /// Create a new transform with zero translation and zero rotation.
    pub fn eye() -> Self {
        Self(Isometry3::<f32>::from_parts(
            Translation3::new(0.0, 0.0, 0.0),
            UnitQuaternion::new(Vector3::<f32>::zeros()),
        ))
    }

    /// Create a new transform from a translation vector and a rotation quaternion.
    pub fn new(xyz: &Vector3<f32>, rotation: &Quaternion<f32>) -> Self {
        Self(Isometry3::<f32>::from_parts(
            Translation3::new(xyz[0], xyz[1], xyz[2]),
            UnitQuaternion::from_quaternion(*rotation),
        ))
    }

    fn exp_so3(omega: &Vector3<f32>) -> (f32, UnitQuaternion<f32>) {
        // https://github.com/strasdat/Sophus/blob/main-1.x/sophus/so3.hpp
        const EPSILON: f32 = 1e-8;
        let theta_sq = omega.norm_squared();

        let (theta, imag_factor, real_factor) = if theta_sq < EPSILON * EPSILON {
            let theta_po4 = theta_sq * theta_sq;
            (
                0.0,
                0.5 - (1.0 / 48.0) * theta_sq + (1.0 / 3840.0) * theta_po4,
                1.0 - (1.0 / 8.0) * theta_sq + (1.0 / 384.0) * theta_po4,
            )
        } else {
            let theta = theta_sq.sqrt();
            let half_theta = 0.5 * theta;
            (theta, half_theta.sin() / theta, half_theta.cos())
        };

        (
            theta,
            UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
                real_factor,
                imag_factor * omega[0],
                imag_factor * omega[1],
                imag_factor * omega[2],
            )),
        )
    }

    /// Create a transform from a 6D vector of the form [x, y, z, rx, ry, rz] where x, y, and z are the translation part
    /// and rx,ry, and rz are the rotation part in the form of a scaled axis.
    ///
    /// # Arguments
    ///
    /// * xyz_so3 - 6D vector of the form [x, y, z, rx, ry, rz]
    ///
    /// # Returns
    ///
    /// * Transform
    pub fn exp(params: &LieGroup) -> Self {
        const EPSILON: f32 = 1e-8;

        match params {
            LieGroup::Se3(xyz_so3) => {
                let omega = Vector3::new(xyz_so3[3], xyz_so3[4], xyz_so3[5]);
                let (theta, quat) = Self::exp_so3(&omega);
                let theta_sq = theta * theta;
                let xyz = {
                    let left_jacobian = {
                        let big_omega = omega.cross_matrix();

                        if theta_sq < EPSILON {
                            Matrix3::identity() + (big_omega * 0.5)
                        } else {
                            let big_omega_squared = big_omega * big_omega;
                            Matrix3::identity()
                                + (1.0 - theta.cos()) / theta_sq * big_omega
                                + (theta - theta.sin()) / (theta_sq * theta) * big_omega_squared
                        }
                    };

                    left_jacobian * Vector3::new(xyz_so3[0], xyz_so3[1], xyz_so3[2])
                };
                Self(Isometry3::<f32>::from_parts(xyz.into(), quat))
            }
            &LieGroup::So3(so3) => {
                let omega = Vector3::new(so3[3], so3[4], so3[5]);
                let (_, quat) = Self::exp_so3(&omega);
                Self(Isometry3::<f32>::from_parts(
                    Translation3::new(0.0, 0.0, 0.0),
                    quat,
                ))
            }
        }
    }

    /// Transforms a 3D point.
    ///
    /// # Arguments
    ///
    /// * rhs - 3D point.
    ///
    /// # Returns
    ///
    /// * 3D point transformed.
    pub fn transform_vector(&self, rhs: &Vector3<f32>) -> Vector3<f32> {
        self.0.rotation * rhs + self.0.translation.vector
    }

    /// Transforms a slice of 3D vectors/points in place.
    pub fn transform_vectors(&self, mut rhs: Vec<Vector3<f32>>) -> Vec<Vector3<f32>> {
        for point in rhs.iter_mut() {
            *point = self.transform_vector(point);
        }

        rhs
    }

    /// Inverts the transform.
    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    /// Returns the rotation angle in radians.
    pub fn angle(&self) -> f32 {
        self.0.rotation.angle()
    }

    /// Returns the translation part.
    pub fn translation(&self) -> Vector3<f32> {
        self.0.translation.vector
    }

    /// Rotation matrix of the transform.
    pub fn rotation_matrix(&self) -> Matrix3<f32> {
        self.0.rotation.to_rotation_matrix().into_inner()
    }

    fn log_so3(rotation: &UnitQuaternion<f32>) -> Vector3<f32> {
        // Inverse of `exp_so3`, following the same Sophus SO3 reference.
        const EPSILON: f32 = 1e-8;
        let im = rotation.imag();
        let im_norm = im.norm();

        if im_norm < EPSILON {
            2.0 * im
        } else {
            let angle = 2.0 * im_norm.atan2(rotation.w);
            im * (angle / im_norm)
        }
    }

    /// Logarithmic map: inverse of [`Transform::exp`] for the `Se3` case.
    /// Returns `[x, y, z, rx, ry, rz]`.
    ///
    /// Used by the graph optimizer to express a pose-graph edge residual as
    /// a twist.
    pub fn se3_log(&self) -> Vector6<f32> {
        const EPSILON: f32 = 1e-8;

        let omega = Self::log_so3(&self.0.rotation);
        let theta_sq = omega.norm_squared();
        let big_omega = omega.cross_matrix();

        let inverse_left_jacobian = if theta_sq < EPSILON {
            Matrix3::identity() - big_omega * 0.5 + (big_omega * big_omega) * (1.0 / 12.0)
        } else {
            let theta = theta_sq.sqrt();
            let half_theta = theta * 0.5;
            let coefficient =
                (1.0 - half_theta * half_theta.cos() / half_theta.sin()) / theta_sq;
            Matrix3::identity() - big_omega * 0.5 + big_omega * big_omega * coefficient
        };

        let translation = inverse_left_jacobian * self.0.translation.vector;
        Vector6::new(
            translation[0],
            translation[1],
            translation[2],
            omega[0],
            omega[1],
            omega[2],
        )
    }

    /// Convenience wrapper around [`Transform::exp`] for the common SE3 case,
    /// taking the 6D update vector produced by an iterative solver directly.
    pub fn se3_exp(update: &Vector6<f32>) -> Self {
        Self::exp(&LieGroup::Se3(*update))
    }
}

impl ops::Mul<&Transform> for &Transform {
    type Output = Transform;

    /// Composes two transforms.
    ///
    /// # Arguments
    ///
    /// * rhs - Transform to compose with, i.e. self * rhs, where rhs is applied first.
    ///
    /// # Returns
    ///
    /// * Composed transform.
    fn mul(self, rhs: &Transform) -> Self::Output {
        Transform(self.0 * rhs.0)
    }
}

impl From<&Transform> for Matrix4<f32> {
    /// Converts a transform to a 4x4 matrix.
    fn from(transform: &Transform) -> Self {
        transform.0.into()
    }
}

pub struct TransformBuilder {
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl Default for TransformBuilder {
    fn default() -> Self {
        Self {
            translation: Vector3::new(0.0, 0.0, 0.0),
            rotation: UnitQuaternion::default(),
        }
    }
}

/// Easy to use builder for transforms.
impl TransformBuilder {
    /// Sets the translation.
    pub fn translation(&mut self, translation: Vector3<f32>) -> &mut Self {
        self.translation = translation;
        self
    }

    /// Sets the rotation.
    ///
    /// # Arguments
    ///
    /// * axis - Rotation axis.
    /// * angle - Rotation angle in radians.
    pub fn axis_angle(&mut self, axis: UnitVector3<f32>, angle: f32) -> &mut Self {
        self.rotation = UnitQuaternion::from_axis_angle(&axis, angle);
        self
    }

    /// Generates a transform from the builder.
    pub fn build(&self) -> Transform {
        Transform(Isometry3::from_parts(
            Translation3::from(self.translation),
            self.rotation,
        ))
    }
}
