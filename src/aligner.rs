//! Iterative least-squares pose aligner.
//!
//! Minimizes the Huber-weighted reprojection error of a set of
//! world-point/current-pixel correspondences over the current left camera
//! pose, using the same [`crate::optim::GaussNewton`] machinery the teacher
//! uses for point-to-plane ICP, generalized here to a 2D reprojection
//! residual and a six-parameter SE(3) update.

use nalgebra::{Vector2, Vector3};

use crate::camera::Camera;
use crate::config::AlignerConfig;
use crate::optim::{GaussNewton, HuberEstimator, RobustEstimator};
use crate::transform::Transform;

/// One 3D↔2D correspondence fed to the aligner: a landmark's (or
/// not-yet-landmarked framepoint's) world coordinate and the pixel it was
/// observed at in the current left image.
#[derive(Clone, Copy, Debug)]
pub struct Correspondence {
    pub world_point: Vector3<f32>,
    pub observed_pixel: Vector2<f32>,
}

/// Outcome of one [`Aligner::align`] call.
#[derive(Clone, Debug)]
pub struct AlignmentResult {
    pub world_to_camera: Transform,
    /// Parallel to the input correspondences: `true` for inliers.
    pub inlier_mask: Vec<bool>,
    pub mean_squared_residual: f32,
    pub iterations: usize,
}

impl AlignmentResult {
    pub fn inlier_count(&self) -> usize {
        self.inlier_mask.iter().filter(|i| **i).count()
    }

    pub fn inlier_ratio(&self) -> f32 {
        if self.inlier_mask.is_empty() {
            0.0
        } else {
            self.inlier_count() as f32 / self.inlier_mask.len() as f32
        }
    }
}

/// Gauss-Newton reprojection-error pose solver.
pub struct Aligner {
    config: AlignerConfig,
}

impl Aligner {
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }

    /// Refines `initial_world_to_camera` against `correspondences`, reporting
    /// per-correspondence inlier/outlier status.
    pub fn align(
        &self,
        correspondences: &[Correspondence],
        camera: &Camera,
        initial_world_to_camera: &Transform,
    ) -> AlignmentResult {
        let huber = HuberEstimator {
            delta: self.config.huber_delta,
        };

        let mut pose = initial_world_to_camera.clone();
        let mut iterations = 0;

        if correspondences.is_empty() {
            return AlignmentResult {
                world_to_camera: pose,
                inlier_mask: Vec::new(),
                mean_squared_residual: 0.0,
                iterations: 0,
            };
        }

        for _ in 0..self.config.max_iterations {
            iterations += 1;
            let mut gn = GaussNewton::<6>::new();

            for correspondence in correspondences {
                let camera_point = pose.transform_vector(&correspondence.world_point);
                if camera_point.z <= 0.0 {
                    continue;
                }
                let (residual, jacobian_row) =
                    reprojection_jacobian(camera, &camera_point, &correspondence.observed_pixel);
                let weight = huber.backward(residual.norm());
                for (row, jac) in [
                    (residual.x * weight, jacobian_row[0]),
                    (residual.y * weight, jacobian_row[1]),
                ] {
                    let weighted: Vec<f32> = jac.iter().map(|v| v * weight).collect();
                    gn.step(row, &weighted);
                }
            }

            let Some(delta) = gn.solve() else { break };
            pose = (&Transform::se3_exp(&-delta)) * &pose;

            if delta.norm() < self.config.convergence_epsilon {
                break;
            }
        }

        let mut inlier_mask = Vec::with_capacity(correspondences.len());
        let mut squared_residual_sum = 0.0f32;
        for correspondence in correspondences {
            let camera_point = pose.transform_vector(&correspondence.world_point);
            if camera_point.z <= 0.0 {
                inlier_mask.push(false);
                continue;
            }
            let (residual, _) = reprojection_jacobian(camera, &camera_point, &correspondence.observed_pixel);
            let residual_norm = residual.norm();
            squared_residual_sum += residual_norm * residual_norm;
            inlier_mask.push(residual_norm <= self.config.huber_delta);
        }
        let mean_squared_residual = squared_residual_sum / correspondences.len() as f32;

        AlignmentResult {
            world_to_camera: pose,
            inlier_mask,
            mean_squared_residual,
            iterations,
        }
    }
}

/// Reprojection residual (predicted − observed, row/col) and its 2x6
/// Jacobian rows with respect to a left-multiplicative SE(3) perturbation
/// `[rho (translation); phi (rotation)]` of the pose that produced
/// `camera_point`.
fn reprojection_jacobian(camera: &Camera, camera_point: &Vector3<f32>, observed_pixel: &Vector2<f32>) -> (Vector2<f32>, [[f32; 6]; 2]) {
    let (row, col) = camera.project(camera_point);
    let residual = Vector2::new(row - observed_pixel.x, col - observed_pixel.y);

    let (x, y, z) = (camera_point.x, camera_point.y, camera_point.z);
    let z2 = z * z;

    // d(row)/d(p_cam), d(col)/d(p_cam).
    let d_row_d_p = Vector3::new(0.0, camera.fy / z, -camera.fy * y / z2);
    let d_col_d_p = Vector3::new(camera.fx / z, 0.0, -camera.fx * x / z2);

    // d(p_cam)/d(rho) = I, d(p_cam)/d(phi) = -skew(p_cam).
    let skew = Vector3::new(x, y, z).cross_matrix();

    let mut row_jac = [0.0f32; 6];
    let mut col_jac = [0.0f32; 6];
    for i in 0..3 {
        row_jac[i] = d_row_d_p[i];
        col_jac[i] = d_col_d_p[i];
    }
    let d_row_d_phi = -(d_row_d_p.transpose() * skew);
    let d_col_d_phi = -(d_col_d_p.transpose() * skew);
    for i in 0..3 {
        row_jac[3 + i] = d_row_d_phi[i];
        col_jac[3 + i] = d_col_d_phi[i];
    }

    (residual, [row_jac, col_jac])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraBuilder;
    use approx::assert_relative_eq;

    fn camera() -> Camera {
        CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build()
    }

    #[test]
    fn recovers_pure_translation() {
        let cam = camera();
        let translation = Vector3::new(0.1, 0.0, 0.0);
        let truth = Transform(nalgebra::Isometry3::from_parts(
            nalgebra::Translation3::from(translation),
            nalgebra::UnitQuaternion::identity(),
        ));

        let world_points = [
            Vector3::new(-0.3, -0.2, 2.0),
            Vector3::new(0.4, -0.1, 2.5),
            Vector3::new(-0.1, 0.3, 3.0),
            Vector3::new(0.2, 0.2, 1.8),
            Vector3::new(0.0, -0.3, 2.2),
        ];

        let correspondences: Vec<Correspondence> = world_points
            .iter()
            .map(|p| {
                let camera_point = truth.transform_vector(p);
                let (row, col) = cam.project(&camera_point);
                Correspondence {
                    world_point: *p,
                    observed_pixel: Vector2::new(row, col),
                }
            })
            .collect();

        let aligner = Aligner::new(AlignerConfig::default());
        let result = aligner.align(&correspondences, &cam, &Transform::eye());

        assert_relative_eq!(result.world_to_camera.translation().x, 0.1, epsilon = 1e-2);
        assert_eq!(result.inlier_count(), correspondences.len());
    }

    #[test]
    fn empty_correspondences_return_identity_result() {
        let aligner = Aligner::new(AlignerConfig::default());
        let result = aligner.align(&[], &camera(), &Transform::eye());
        assert!(result.inlier_mask.is_empty());
        assert_eq!(result.iterations, 0);
    }
}
