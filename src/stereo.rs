//! Per-frame stereo matching and triangulation.

use std::collections::HashMap;

use crate::camera::StereoCamera;
use crate::config::TriangulatorConfig;
use crate::descriptor::BinaryDescriptor;
use crate::framepoint::FramePoint;
use crate::ids::{FrameId, FramePointId, IdCounter};
use crate::keypoint::Keypoint;

/// One detected keypoint with its descriptor, as handed over by the
/// image-processing collaborator.
#[derive(Clone, Copy, Debug)]
pub struct Observation {
    pub keypoint: Keypoint,
    pub descriptor: BinaryDescriptor,
}

/// Matches left/right keypoints along the epipolar line and triangulates
/// them into camera-left 3D coordinates.
pub struct StereoTriangulator {
    config: TriangulatorConfig,
}

impl StereoTriangulator {
    pub fn new(config: TriangulatorConfig) -> Self {
        Self { config }
    }

    /// Produces framepoints for one stereo image pair.
    ///
    /// `left`/`right` need not be pre-sorted: candidates are gathered by
    /// scanning `right`, since row-sorting an externally supplied vector on
    /// every call would be wasted work when the collaborator already hands
    /// over small per-frame lists. Epipolar pairing is logically row-indexed;
    /// this scans linearly to the same effect without requiring the caller
    /// to pre-sort. Each left keypoint first proposes its own best right
    /// candidate; proposals that collide on the same right keypoint are then
    /// resolved globally by the smallest-distance tie-break, independent of
    /// left-iteration order.
    pub fn compute(
        &self,
        frame: FrameId,
        left: &[Observation],
        right: &[Observation],
        camera: &StereoCamera,
        ids: &mut IdCounter,
        maximum_depth_close: f32,
    ) -> Vec<FramePoint> {
        // Each left keypoint independently proposes its best right candidate
        // first; conflicting proposals for the same right keypoint are then
        // resolved globally (smallest descriptor distance, then smallest
        // pixel distance) rather than by left-iteration order, so the winner
        // doesn't depend on which left keypoint happens to come first.
        let mut proposals: Vec<(usize, usize, u32, f32)> = Vec::new();
        for (left_index, left_obs) in left.iter().enumerate() {
            if let Some((right_index, distance, pixel_distance)) = self.best_right_match(left_obs, right) {
                proposals.push((left_index, right_index, distance, pixel_distance));
            }
        }

        let mut winner_by_right: HashMap<usize, (usize, u32, f32)> = HashMap::new();
        for (left_index, right_index, distance, pixel_distance) in proposals {
            let is_better = match winner_by_right.get(&right_index) {
                None => true,
                Some(&(_, best_distance, best_pixel)) => {
                    distance < best_distance || (distance == best_distance && pixel_distance < best_pixel)
                }
            };
            if is_better {
                winner_by_right.insert(right_index, (left_index, distance, pixel_distance));
            }
        }

        let mut pairs: Vec<(usize, usize)> =
            winner_by_right.into_iter().map(|(right_index, (left_index, ..))| (left_index, right_index)).collect();
        pairs.sort_unstable_by_key(|&(left_index, _)| left_index);

        let mut points = Vec::new();
        for (left_index, right_index) in pairs {
            let left_obs = &left[left_index];
            let right_obs = &right[right_index];

            let disparity = left_obs.keypoint.col - right_obs.keypoint.col;
            if disparity < self.config.minimum_disparity_pixels {
                continue;
            }

            let camera_left_coordinates = camera.triangulate(left_obs.keypoint.row, left_obs.keypoint.col, disparity);
            let robot_coordinates = camera.left.camera_to_robot.transform_vector(&camera_left_coordinates);

            points.push(FramePoint::new_standalone(
                FramePointId(ids.next()),
                frame,
                left_obs.keypoint,
                right_obs.keypoint,
                left_obs.descriptor,
                right_obs.descriptor,
                camera_left_coordinates,
                robot_coordinates,
                maximum_depth_close,
            ));
        }

        points
    }

    /// Row-indexed candidate search plus Hamming-distance matching; returns
    /// the best right candidate's index, descriptor distance and pixel
    /// distance, without regard to whether it's later claimed by another
    /// left keypoint.
    fn best_right_match(&self, left_obs: &Observation, right: &[Observation]) -> Option<(usize, u32, f32)> {
        let mut best: Option<(usize, u32, f32)> = None;

        for (index, right_obs) in right.iter().enumerate() {
            if (right_obs.keypoint.row - left_obs.keypoint.row).abs() > self.config.epipolar_row_tolerance {
                continue;
            }
            if right_obs.keypoint.col > left_obs.keypoint.col - self.config.minimum_disparity_pixels {
                continue;
            }

            let distance = left_obs.descriptor.hamming_distance(&right_obs.descriptor);
            if distance > self.config.maximum_matching_distance_triangulation {
                continue;
            }

            let pixel_distance = left_obs.keypoint.pixel_distance(&right_obs.keypoint);
            let is_better = match best {
                None => true,
                Some((_, best_distance, best_pixel)) => {
                    distance < best_distance || (distance == best_distance && pixel_distance < best_pixel)
                }
            };
            if is_better {
                best = Some((index, distance, pixel_distance));
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraBuilder;

    fn stereo_camera() -> StereoCamera {
        let left = CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build();
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
    fn matches_and_triangulates_a_single_pair() {
        let triangulator = StereoTriangulator::new(TriangulatorConfig::default());
        let left = vec![observation(240.0, 320.0, 1)];
        let right = vec![observation(240.0, 220.0, 1)];
        let mut ids = IdCounter::new();

        let points = triangulator.compute(FrameId(0), &left, &right, &stereo_camera(), &mut ids, 5.0);
        assert_eq!(points.len(), 1);
        assert!((points[0].camera_left_coordinates.z - 2.5).abs() < 1e-4);
    }

    #[test]
    fn disparity_below_minimum_is_discarded() {
        let triangulator = StereoTriangulator::new(TriangulatorConfig::default());
        let left = vec![observation(240.0, 320.0, 1)];
        let right = vec![observation(240.0, 319.5, 1)];
        let mut ids = IdCounter::new();

        let points = triangulator.compute(FrameId(0), &left, &right, &stereo_camera(), &mut ids, 5.0);
        assert!(points.is_empty());
    }

    #[test]
    fn disparity_exactly_at_minimum_is_accepted() {
        // spec.md §8 boundary behavior 9.
        let config = TriangulatorConfig {
            minimum_disparity_pixels: 1.0,
            ..TriangulatorConfig::default()
        };
        let triangulator = StereoTriangulator::new(config);
        let left = vec![observation(240.0, 321.0, 1)];
        let right = vec![observation(240.0, 320.0, 1)];
        let mut ids = IdCounter::new();

        let points = triangulator.compute(FrameId(0), &left, &right, &stereo_camera(), &mut ids, 5.0);
        assert_eq!(points.len(), 1);

        let config_one_less = TriangulatorConfig {
            minimum_disparity_pixels: 1.000001,
            ..TriangulatorConfig::default()
        };
        let rejecting_triangulator = StereoTriangulator::new(config_one_less);
        let mut ids = IdCounter::new();
        let points = rejecting_triangulator.compute(FrameId(0), &left, &right, &stereo_camera(), &mut ids, 5.0);
        assert!(points.is_empty());
    }

    #[test]
    fn right_keypoint_is_claimed_by_at_most_one_left_keypoint() {
        let triangulator = StereoTriangulator::new(TriangulatorConfig::default());
        let left = vec![observation(240.0, 320.0, 1), observation(240.0, 321.0, 1)];
        let right = vec![observation(240.0, 220.0, 1)];
        let mut ids = IdCounter::new();

        let points = triangulator.compute(FrameId(0), &left, &right, &stereo_camera(), &mut ids, 5.0);
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn right_keypoint_conflict_is_resolved_by_smallest_pixel_distance_not_left_order() {
        // The second left keypoint (listed first) is farther from the right
        // candidate than the first (listed second); the winner must be
        // chosen by the tie-break rule, not by left-iteration order.
        let triangulator = StereoTriangulator::new(TriangulatorConfig::default());
        let left = vec![observation(240.0, 330.0, 1), observation(240.0, 320.0, 1)];
        let right = vec![observation(240.0, 220.0, 1)];
        let mut ids = IdCounter::new();

        let points = triangulator.compute(FrameId(0), &left, &right, &stereo_camera(), &mut ids, 5.0);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].keypoint_left.col, 320.0, "closer left keypoint should win the conflict");
    }

    #[test]
    fn no_candidates_yields_empty_output() {
        let triangulator = StereoTriangulator::new(TriangulatorConfig::default());
        let left = vec![observation(240.0, 320.0, 1)];
        let right: Vec<Observation> = vec![];
        let mut ids = IdCounter::new();

        let points = triangulator.compute(FrameId(0), &left, &right, &stereo_camera(), &mut ids, 5.0);
        assert!(points.is_empty());
    }
}
