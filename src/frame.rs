//! One time instant in the sequence.

use crate::camera::Camera;
use crate::framepoint::FramePoint;
use crate::ids::{FrameId, FramePointId, LocalMapId};
use crate::transform::Transform;

/// Frame.Status state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Localizing,
    Tracking,
}

/// Cached frame↔local-map transform pair, kept consistent with the
/// invariant `frame_to_local_map = local_map.world_to_robot · robot_to_world`.
#[derive(Clone, Debug)]
pub struct LocalMapBinding {
    pub local_map: LocalMapId,
    pub frame_to_local_map: Transform,
    pub local_map_to_frame: Transform,
}

/// One ingested time instant.
#[derive(Clone, Debug)]
pub struct Frame {
    pub id: FrameId,
    pub status: Status,

    pub previous: Option<FrameId>,
    pub next: Option<FrameId>,

    robot_to_world: Transform,
    world_to_robot: Transform,
    pub robot_to_world_ground_truth: Option<Transform>,

    pub camera_left: Camera,
    pub camera_right: Camera,

    /// Intensity images, released after triangulation to bound memory.
    pub left_image: Option<Vec<u8>>,
    pub right_image: Option<Vec<u8>>,

    pub points: Vec<FramePointId>,

    pub local_map: Option<LocalMapBinding>,
}

impl Frame {
    pub fn new(id: FrameId, robot_to_world: Transform, camera_left: Camera, camera_right: Camera) -> Self {
        let world_to_robot = robot_to_world.inverse();
        Self {
            id,
            status: Status::Localizing,
            previous: None,
            next: None,
            robot_to_world,
            world_to_robot,
            robot_to_world_ground_truth: None,
            camera_left,
            camera_right,
            left_image: None,
            right_image: None,
            points: Vec::new(),
            local_map: None,
        }
    }

    pub fn robot_to_world(&self) -> &Transform {
        &self.robot_to_world
    }

    pub fn world_to_robot(&self) -> &Transform {
        &self.world_to_robot
    }

    /// Updates the pose estimate and invalidates the cached inverse.
    pub fn set_robot_to_world(&mut self, robot_to_world: Transform) {
        self.world_to_robot = robot_to_world.inverse();
        self.robot_to_world = robot_to_world;
    }

    /// Drops the intensity images once the triangulator has consumed them.
    pub fn release_images(&mut self) {
        self.left_image = None;
        self.right_image = None;
    }

    /// Binds this frame to a local map, caching both directions of the
    /// frame↔local-map transform.
    pub fn bind_local_map(&mut self, local_map: LocalMapId, local_map_world_to_robot: &Transform) {
        let frame_to_local_map = Transform(local_map_world_to_robot.0 * self.robot_to_world.0);
        let local_map_to_frame = frame_to_local_map.inverse();
        self.local_map = Some(LocalMapBinding {
            local_map,
            frame_to_local_map,
            local_map_to_frame,
        });
    }

    pub fn has_predecessor(&self) -> bool {
        self.previous.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraBuilder;
    use crate::transform::TransformBuilder;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn sample_frame(id: u64) -> Frame {
        let cam = CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build();
        Frame::new(FrameId(id), Transform::eye(), cam.clone(), cam)
    }

    #[test]
    fn new_frame_starts_localizing_with_no_links() {
        let frame = sample_frame(0);
        assert_eq!(frame.status, Status::Localizing);
        assert!(!frame.has_predecessor());
        assert!(frame.next.is_none());
        assert!(frame.local_map.is_none());
    }

    #[test]
    fn set_robot_to_world_keeps_inverse_consistent() {
        let mut frame = sample_frame(0);
        let pose = TransformBuilder::default().translation(Vector3::new(1.0, 2.0, 3.0)).build();
        frame.set_robot_to_world(pose);
        let roundtrip = frame.world_to_robot().transform_vector(&frame.robot_to_world().transform_vector(&Vector3::new(5.0, 0.0, 0.0)));
        assert_relative_eq!(roundtrip.x, 5.0, epsilon = 1e-5);
        assert_relative_eq!(roundtrip.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(roundtrip.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn bind_local_map_caches_mutually_inverse_transforms() {
        let mut frame = sample_frame(0);
        frame.set_robot_to_world(TransformBuilder::default().translation(Vector3::new(1.0, 0.0, 0.0)).build());
        let local_map_world_to_robot = Transform::eye();
        frame.bind_local_map(FrameId(0), &local_map_world_to_robot);

        let binding = frame.local_map.as_ref().unwrap();
        let identity = Transform(binding.frame_to_local_map.0 * binding.local_map_to_frame.0);
        assert_relative_eq!(identity.translation().x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(identity.angle(), 0.0, epsilon = 1e-5);
    }
}
