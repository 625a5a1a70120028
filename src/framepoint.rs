//! Observations of a scene point in one stereo image pair.

use nalgebra::Vector3;

use crate::descriptor::BinaryDescriptor;
use crate::ids::{FrameId, FramePointId, LandmarkId};
use crate::keypoint::Keypoint;

/// A single stereo observation, optionally linked into a track.
///
/// Owned exclusively by its [`crate::frame::Frame`] for its entire lifetime.
/// `previous`/`origin`/`landmark` are non-owning identifiers resolved
/// through [`crate::world_map::WorldMap`].
#[derive(Clone, Debug)]
pub struct FramePoint {
    pub id: FramePointId,
    pub frame: FrameId,

    pub keypoint_left: Keypoint,
    pub keypoint_right: Keypoint,
    pub descriptor_left: BinaryDescriptor,
    pub descriptor_right: BinaryDescriptor,

    /// Triangulated position in the camera-left frame. Invariant: `z > 0`.
    pub camera_left_coordinates: Vector3<f32>,
    /// Same point transformed into the robot frame.
    pub robot_coordinates: Vector3<f32>,
    pub depth_meters: f32,
    pub is_near: bool,

    /// The framepoint this one was tracked from, if any.
    pub previous: Option<FramePointId>,
    /// The first framepoint of this track chain (itself if `previous` is
    /// `None`).
    pub origin: FramePointId,
    /// 1 when created standalone, else `previous.track_length + 1`.
    pub track_length: u32,

    pub landmark: Option<LandmarkId>,
}

impl FramePoint {
    /// Constructs a standalone framepoint (no predecessor): `origin` is
    /// itself and `track_length` is 1.
    #[allow(clippy::too_many_arguments)]
    pub fn new_standalone(
        id: FramePointId,
        frame: FrameId,
        keypoint_left: Keypoint,
        keypoint_right: Keypoint,
        descriptor_left: BinaryDescriptor,
        descriptor_right: BinaryDescriptor,
        camera_left_coordinates: Vector3<f32>,
        robot_coordinates: Vector3<f32>,
        maximum_depth_close: f32,
    ) -> Self {
        debug_assert!(camera_left_coordinates.z > 0.0, "framepoint must be in front of the camera");
        let depth_meters = camera_left_coordinates.z;
        Self {
            id,
            frame,
            keypoint_left,
            keypoint_right,
            descriptor_left,
            descriptor_right,
            camera_left_coordinates,
            robot_coordinates,
            depth_meters,
            is_near: depth_meters < maximum_depth_close,
            previous: None,
            origin: id,
            track_length: 1,
            landmark: None,
        }
    }

    /// Links this (already-constructed) framepoint to a predecessor in an
    /// earlier frame, inheriting its origin and extending its track length.
    ///
    /// Invariant : `previous.frame` must be strictly earlier
    /// than `self.frame`, which the caller (the world map registry) is
    /// responsible for upholding since this module cannot see other frames.
    pub fn link_previous(&mut self, previous_id: FramePointId, previous_origin: FramePointId, previous_track_length: u32) {
        self.previous = Some(previous_id);
        self.origin = previous_origin;
        self.track_length = previous_track_length + 1;
    }

    pub fn is_origin(&self) -> bool {
        self.origin == self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keypoint() -> Keypoint {
        Keypoint::new(240.0, 320.0)
    }

    fn make(id: u64) -> FramePoint {
        FramePoint::new_standalone(
            FramePointId(id),
            FrameId(0),
            sample_keypoint(),
            sample_keypoint(),
            BinaryDescriptor::zero(),
            BinaryDescriptor::zero(),
            Vector3::new(0.0, 0.0, 2.5),
            Vector3::new(0.0, 0.0, 2.5),
            5.0,
        )
    }

    #[test]
    fn standalone_point_is_its_own_origin() {
        let point = make(0);
        assert!(point.is_origin());
        assert_eq!(point.track_length, 1);
        assert!(point.previous.is_none());
    }

    #[test]
    fn is_near_flag_depends_on_threshold() {
        let near = make(0);
        assert!(near.is_near);

        let far = FramePoint::new_standalone(
            FramePointId(1),
            FrameId(0),
            sample_keypoint(),
            sample_keypoint(),
            BinaryDescriptor::zero(),
            BinaryDescriptor::zero(),
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(0.0, 0.0, 10.0),
            5.0,
        );
        assert!(!far.is_near);
    }

    #[test]
    fn linking_previous_extends_track_and_inherits_origin() {
        let mut current = make(5);
        current.link_previous(FramePointId(4), FramePointId(1), 3);
        assert_eq!(current.previous, Some(FramePointId(4)));
        assert_eq!(current.origin, FramePointId(1));
        assert_eq!(current.track_length, 4);
        assert!(!current.is_origin());
    }
}
