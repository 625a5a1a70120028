//! Pose-graph optimization and landmark refresh.
//!
//! One vertex per local map; odometry edges link consecutive local maps,
//! closure edges link every registered `(query, reference)` pair. Rather
//! than assembling one large sparse normal-equation system, each sweep
//! refines every non-root vertex in turn against its incident edges with
//! the teacher's [`crate::optim::GaussNewton`] 6x6 block solver (numeric
//! Jacobians via central differences, since the per-edge SE(3) residual's
//! analytic adjoint is easy to get subtly wrong and graphs here are small
//! local-map counts, not grid-scale pose graphs) — a Gauss-Seidel
//! relaxation akin to the pre-g2o TORO/SPA solvers, bounded by
//! `pose_graph_iterations`.

use std::collections::HashMap;

use log::warn;
use nalgebra::Vector6;

use crate::config::GraphOptimizerConfig;
use crate::ids::LocalMapId;
use crate::optim::GaussNewton;
use crate::transform::Transform;
use crate::world_map::WorldMap;

struct Edge {
    target: LocalMapId,
    source: LocalMapId,
    /// Maps `source`'s robot frame into `target`'s robot frame.
    measurement: Transform,
    information: f32,
}

pub struct GraphOptimizer {
    config: GraphOptimizerConfig,
}

impl GraphOptimizer {
    pub fn new(config: GraphOptimizerConfig) -> Self {
        Self { config }
    }

    /// Runs after every WorldMap closure event; the caller is expected to
    /// skip this call when no closures exist since the last run.
    pub fn optimize(&self, world_map: &mut WorldMap) {
        let local_map_ids = world_map.local_map_ids().to_vec();
        if local_map_ids.len() < 2 {
            return;
        }

        let mut poses: HashMap<LocalMapId, Transform> = local_map_ids
            .iter()
            .map(|id| (*id, world_map.frame(*id).unwrap().robot_to_world().clone()))
            .collect();

        let edges = self.build_edges(world_map, &local_map_ids, &poses);
        let root = local_map_ids[0];

        for _ in 0..self.config.pose_graph_iterations {
            for &vertex in &local_map_ids {
                if vertex == root {
                    continue;
                }
                if let Some(delta) = self.solve_vertex(vertex, &edges, &poses) {
                    let current = poses.get(&vertex).unwrap();
                    let updated = &Transform::se3_exp(&-delta) * current;
                    poses.insert(vertex, updated);
                }
            }
        }

        for (id, pose) in &poses {
            world_map.set_local_map_pose(*id, pose.clone());
        }
        self.refresh_landmarks(world_map, &local_map_ids);
    }

    fn build_edges(&self, world_map: &WorldMap, local_map_ids: &[LocalMapId], poses: &HashMap<LocalMapId, Transform>) -> Vec<Edge> {
        let mut edges = Vec::new();

        for window in local_map_ids.windows(2) {
            let (previous, current) = (window[0], window[1]);
            let measurement = relative_pose(&poses[&previous], &poses[&current]);
            edges.push(Edge {
                target: previous,
                source: current,
                measurement,
                information: self.config.odometry_information_scale,
            });
        }

        for &query in local_map_ids {
            for closure in world_map.closure_edges(query) {
                let current_relative = relative_pose(&poses[&closure.reference], &poses[&query]);
                let translation_delta = (closure.transform.translation() - current_relative.translation()).norm();
                if translation_delta > self.config.large_closure_translation_threshold {
                    warn!(
                        "closure {:?} -> {:?} has a high-impact translation delta of {:.2} m; adding to graph anyway",
                        query, closure.reference, translation_delta
                    );
                }
                edges.push(Edge {
                    target: closure.reference,
                    source: query,
                    measurement: closure.transform,
                    information: self.config.odometry_information_scale * closure.confidence,
                });
            }
        }

        edges
    }

    /// One Gauss-Newton solve for `vertex`'s own 6-DOF perturbation against
    /// every edge touching it, holding the other endpoint fixed.
    fn solve_vertex(&self, vertex: LocalMapId, edges: &[Edge], poses: &HashMap<LocalMapId, Transform>) -> Option<Vector6<f32>> {
        let mut gn = GaussNewton::<6>::new();
        let mut touched = false;

        for edge in edges {
            let vertex_is_target = edge.target == vertex;
            let vertex_is_source = edge.source == vertex;
            if !vertex_is_target && !vertex_is_source {
                continue;
            }
            touched = true;

            let target_pose = poses[&edge.target].clone();
            let source_pose = poses[&edge.source].clone();
            let residual_fn = |xi: &Vector6<f32>| -> Vector6<f32> {
                let perturbed = perturb(xi, if vertex_is_target { &target_pose } else { &source_pose });
                let (t, s) = if vertex_is_target { (&perturbed, &source_pose) } else { (&target_pose, &perturbed) };
                edge_residual(t, s, &edge.measurement)
            };

            let sqrt_info = edge.information.max(1e-6).sqrt();
            let (residual0, jacobian) = numeric_jacobian(residual_fn);
            for row in 0..6 {
                let weighted_residual = residual0[row] * sqrt_info;
                let mut weighted_jacobian = [0.0f32; 6];
                for col in 0..6 {
                    weighted_jacobian[col] = jacobian[row][col] * sqrt_info;
                }
                gn.step(weighted_residual, &weighted_jacobian);
            }
        }

        if touched {
            gn.solve()
        } else {
            None
        }
    }

    /// Recomputes every landmark's world coordinates through its anchoring
    /// local map's corrected pose.
    fn refresh_landmarks(&self, world_map: &mut WorldMap, local_map_ids: &[LocalMapId]) {
        let mut updates = Vec::new();
        for &local_map_id in local_map_ids {
            let Some(extension) = world_map.local_map_extension(local_map_id) else { continue };
            let robot_to_world = world_map.frame(local_map_id).unwrap().robot_to_world().clone();
            for item in &extension.items {
                let world_coordinates = robot_to_world.transform_vector(&item.robot_coordinates);
                updates.push((item.landmark, world_coordinates));
            }
        }
        for (landmark_id, world_coordinates) in updates {
            if let Some(landmark) = world_map.landmarks_mut().get_mut(&landmark_id) {
                landmark.reset_coordinates(world_coordinates);
            }
        }
    }
}

/// Maps `source`'s robot frame into `target`'s robot frame: `target^-1 ·
/// source` (matches `world_map.cpp`'s `worldToRobot() * robotToWorld()`
/// composition for both odometry and closure edges).
fn relative_pose(target: &Transform, source: &Transform) -> Transform {
    &target.inverse() * source
}

fn edge_residual(target_pose: &Transform, source_pose: &Transform, measurement: &Transform) -> Vector6<f32> {
    let relative = relative_pose(target_pose, source_pose);
    let error = &measurement.inverse() * &relative;
    error.se3_log()
}

fn perturb(xi: &Vector6<f32>, pose: &Transform) -> Transform {
    &Transform::se3_exp(xi) * pose
}

/// Central-difference Jacobian of a residual function around zero
/// perturbation, returned as `(residual_at_zero, jacobian_rows)`.
fn numeric_jacobian(residual_fn: impl Fn(&Vector6<f32>) -> Vector6<f32>) -> (Vector6<f32>, [[f32; 6]; 6]) {
    const H: f32 = 1e-4;
    let residual0 = residual_fn(&Vector6::zeros());

    let mut columns = [Vector6::zeros(); 6];
    for (dim, column) in columns.iter_mut().enumerate() {
        let mut plus = Vector6::zeros();
        plus[dim] = H;
        let mut minus = Vector6::zeros();
        minus[dim] = -H;
        *column = (residual_fn(&plus) - residual_fn(&minus)) / (2.0 * H);
    }

    let mut rows = [[0.0f32; 6]; 6];
    for row in 0..6 {
        for col in 0..6 {
            rows[row][col] = columns[col][row];
        }
    }
    (residual0, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, CameraBuilder, StereoCamera};
    use crate::config::SlamConfig;
    use crate::descriptor::BinaryDescriptor;
    use crate::keypoint::Keypoint;
    use crate::stereo::Observation;
    use crate::world_map::WorldMap;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn stereo_camera() -> StereoCamera {
        let left: Camera = CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build();
        let right = CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build();
        StereoCamera::new(left, right, 0.5)
    }

    fn observation(row: f32, col: f32, descriptor: u64) -> Observation {
        Observation {
            keypoint: Keypoint::new(row, col),
            descriptor: BinaryDescriptor([descriptor, 0, 0, 0]),
        }
    }

    #[test]
    fn identity_closure_pulls_drifted_chain_back_together() {
        let mut config = SlamConfig::default();
        config.local_map.minimum_number_of_frames = 1;
        config.local_map.minimum_distance_traveled = 0.01;
        let mut world_map = WorldMap::new(config, stereo_camera());

        let left = vec![observation(240.0, 320.0, 1)];
        let right = vec![observation(240.0, 220.0, 1)];
        for _ in 0..6 {
            world_map.step(Transform::eye(), &left, &right, (480.0, 640.0), None);
        }

        let local_maps = world_map.local_map_ids().to_vec();
        assert!(local_maps.len() >= 2, "expected at least two sealed local maps, got {}", local_maps.len());

        // introduce synthetic drift on the last local map before closing the loop
        let drifted = Transform(nalgebra::Isometry3::from_parts(
            nalgebra::Translation3::from(Vector3::new(0.2, 0.0, 0.0)),
            nalgebra::UnitQuaternion::identity(),
        ));
        let last = *local_maps.last().unwrap();
        let current = world_map.frame(last).unwrap().robot_to_world().clone();
        world_map.set_local_map_pose(last, &drifted * &current);

        world_map.close_local_maps(last, local_maps[0], Transform::eye(), 1.0);

        let optimizer = GraphOptimizer::new(config.graph_optimizer);
        optimizer.optimize(&mut world_map);

        let root_pose = world_map.frame(local_maps[0]).unwrap().robot_to_world().clone();
        let last_pose = world_map.frame(last).unwrap().robot_to_world().clone();
        let residual = relative_pose(&root_pose, &last_pose).translation().norm();
        assert!(residual < 0.2, "closure should have pulled the chain back together, residual = {residual}");
    }

    #[test]
    fn optimizer_is_idempotent_with_no_new_edges() {
        let mut config = SlamConfig::default();
        config.local_map.minimum_number_of_frames = 1;
        config.local_map.minimum_distance_traveled = 0.01;
        let mut world_map = WorldMap::new(config, stereo_camera());
        let left = vec![observation(240.0, 320.0, 1)];
        let right = vec![observation(240.0, 220.0, 1)];
        for _ in 0..4 {
            world_map.step(Transform::eye(), &left, &right, (480.0, 640.0), None);
        }
        let local_maps = world_map.local_map_ids().to_vec();
        world_map.close_local_maps(*local_maps.last().unwrap(), local_maps[0], Transform::eye(), 1.0);

        let optimizer = GraphOptimizer::new(config.graph_optimizer);
        optimizer.optimize(&mut world_map);
        let first_pass: Vec<Transform> = local_maps.iter().map(|id| world_map.frame(*id).unwrap().robot_to_world().clone()).collect();

        optimizer.optimize(&mut world_map);
        let second_pass: Vec<Transform> = local_maps.iter().map(|id| world_map.frame(*id).unwrap().robot_to_world().clone()).collect();

        for (a, b) in first_pass.iter().zip(second_pass.iter()) {
            assert_relative_eq!(a.translation().x, b.translation().x, epsilon = 1e-6);
            assert_relative_eq!(a.translation().y, b.translation().y, epsilon = 1e-6);
            assert_relative_eq!(a.translation().z, b.translation().z, epsilon = 1e-6);
        }
    }
}
