//! Frame-to-frame feature association, pose alignment and point recovery.

use std::collections::HashMap;

use nalgebra::Vector2;

use crate::aligner::{Aligner, Correspondence};
use crate::camera::Camera;
use crate::chronometer::ChronometerRegistry;
use crate::config::{AlignerConfig, LandmarkConfig, TrackerConfig};
use crate::frame::{Frame, Status};
use crate::framepoint::FramePoint;
use crate::ids::{IdCounter, LandmarkId};
use crate::landmark::{Landmark, Measurement};
use crate::transform::Transform;

/// Running per-frame statistics (original's `mean_tracking_ratio` etc. from
/// `base_tracker.h`), exposed as plain getters for a visualization/metrics
/// collaborator to poll between frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrackingStats {
    pub mean_tracking_ratio: f32,
    pub mean_number_of_keypoints: f32,
    pub mean_number_of_framepoints: f32,
}

impl TrackingStats {
    fn update(&mut self, tracking_ratio: f32, number_of_keypoints: usize, number_of_framepoints: usize) {
        const ALPHA: f32 = 0.1;
        self.mean_tracking_ratio += ALPHA * (tracking_ratio - self.mean_tracking_ratio);
        self.mean_number_of_keypoints += ALPHA * (number_of_keypoints as f32 - self.mean_number_of_keypoints);
        self.mean_number_of_framepoints += ALPHA * (number_of_framepoints as f32 - self.mean_number_of_framepoints);
    }
}

/// Outcome of one [`Tracker::track`] call.
pub struct TrackOutcome {
    pub status: Status,
    pub number_of_recursive_registrations: u32,
}

/// One previous-frame framepoint projected into the current image.
struct Projection {
    previous_index: usize,
    row: f32,
    col: f32,
}

pub struct Tracker {
    config: TrackerConfig,
    landmark_config: LandmarkConfig,
    aligner: Aligner,
    chronometers: ChronometerRegistry,
    stats: TrackingStats,
    last_relative_motion: Transform,
}

impl Tracker {
    pub fn new(config: TrackerConfig, aligner_config: AlignerConfig, landmark_config: LandmarkConfig) -> Self {
        Self {
            config,
            landmark_config,
            aligner: Aligner::new(aligner_config),
            chronometers: ChronometerRegistry::new(),
            stats: TrackingStats::default(),
            last_relative_motion: Transform::eye(),
        }
    }

    pub fn stats(&self) -> TrackingStats {
        self.stats
    }

    pub fn chronometers(&self) -> &ChronometerRegistry {
        &self.chronometers
    }

    /// Runs the full per-frame tracking pipeline: predict, associate, align,
    /// recover, and fold results into the landmark registry.
    ///
    /// `previous_points`/`current_points` are the framepoints owned by the
    /// respective frames, resolved by the caller ([`crate::world_map::WorldMap`])
    /// through its framepoint registry. `current_points` must already contain
    /// the fresh, unlinked framepoints the triangulator produced this frame.
    #[allow(clippy::too_many_arguments)]
    pub fn track(
        &mut self,
        previous: &Frame,
        previous_points: &[FramePoint],
        current_frame: &mut Frame,
        current_points: &mut Vec<FramePoint>,
        landmarks: &mut HashMap<LandmarkId, Landmark>,
        camera: &Camera,
        odometry_hint: Option<Transform>,
        image_size: (f32, f32),
        landmark_ids: &mut IdCounter,
    ) -> TrackOutcome {
        let stage_start = std::time::Instant::now();
        let number_of_keypoints = current_points.len();

        // 1. Motion prediction.
        let predicted_motion = odometry_hint.unwrap_or_else(|| self.last_relative_motion.clone());
        current_frame.set_robot_to_world(previous.robot_to_world() * &predicted_motion);

        if previous_points.is_empty() {
            self.finish_first_frame(current_frame, current_points, number_of_keypoints);
            self.chronometers.record("tracking", stage_start.elapsed());
            return TrackOutcome {
                status: Status::Localizing,
                number_of_recursive_registrations: 0,
            };
        }

        let robot_to_camera = camera.camera_to_robot.inverse();

        let mut radius = self.config.projection_tracking_distance_pixels;
        let mut recursions = 0;
        let mut best: Option<(Vec<(usize, usize)>, crate::aligner::AlignmentResult)> = None;
        let pose_optimization_start = std::time::Instant::now();

        loop {
            let projections = self.project_previous_points(previous, previous_points, current_frame, &robot_to_camera, camera, image_size);
            let mut associations = self.associate(&projections, previous_points, current_points, radius);
            if self.config.enable_bin_regularization {
                associations = self.regularize_bins(associations, previous_points, current_points);
            }

            let correspondences: Vec<Correspondence> = associations
                .iter()
                .map(|(previous_index, current_index)| {
                    let previous_point = &previous_points[*previous_index];
                    let world_point = match previous_point.landmark.and_then(|id| landmarks.get(&id)) {
                        Some(landmark) => landmark.current.world_coordinates,
                        None => previous.robot_to_world().transform_vector(&previous_point.robot_coordinates),
                    };
                    let observation = &current_points[*current_index].keypoint_left;
                    Correspondence {
                        world_point,
                        observed_pixel: Vector2::new(observation.row, observation.col),
                    }
                })
                .collect();

            let world_to_camera_guess = &robot_to_camera * current_frame.world_to_robot();
            let result = self.aligner.align(&correspondences, camera, &world_to_camera_guess);
            recursions += 1;

            let succeeded = result.inlier_ratio() >= self.config.minimum_inlier_ratio && result.mean_squared_residual < self.config.maximum_residual;

            let done = succeeded || recursions > self.config.maximum_number_of_recursive_registrations;
            best = Some((associations, result));
            if done {
                break;
            }
            radius = (radius * 2.0).min(image_size.0.max(image_size.1));
        }

        self.chronometers.record("pose_optimization", pose_optimization_start.elapsed());

        let (associations, result) = best.expect("at least one registration attempt always runs");
        let succeeded = result.inlier_ratio() >= self.config.minimum_inlier_ratio && result.mean_squared_residual < self.config.maximum_residual;

        let camera_to_robot = camera.camera_to_robot.clone();
        let world_to_robot = (&camera_to_robot) * &result.world_to_camera;
        current_frame.set_robot_to_world(world_to_robot.inverse());
        self.last_relative_motion = previous.world_to_robot() * current_frame.robot_to_world();

        // 6. Prune: apply the inlier mask, keeping `previous` links on
        // outliers untouched while linking inliers.
        let mut matched_current = vec![false; current_points.len()];
        for (&(previous_index, current_index), is_inlier) in associations.iter().zip(result.inlier_mask.iter()) {
            matched_current[current_index] = true;
            if !is_inlier {
                continue;
            }
            let previous_point = &previous_points[previous_index];
            current_points[current_index].link_previous(previous_point.id, previous_point.origin, previous_point.track_length);
            current_points[current_index].landmark = previous_point.landmark;
        }

        for previous_point in previous_points {
            if let Some(landmark_id) = previous_point.landmark {
                if let Some(landmark) = landmarks.get_mut(&landmark_id) {
                    landmark.is_currently_tracked = false;
                }
            }
        }
        for (previous_index, current_index) in &associations {
            if current_points[*current_index].previous == Some(previous_points[*previous_index].id) {
                if let Some(landmark_id) = current_points[*current_index].landmark {
                    if let Some(landmark) = landmarks.get_mut(&landmark_id) {
                        landmark.is_currently_tracked = true;
                    }
                }
            }
        }

        // 7. Point recovery.
        let point_recovery_start = std::time::Instant::now();
        let recovered = self.recover_points(current_frame, current_points, &matched_current, landmarks, camera, &robot_to_camera, image_size);
        self.chronometers.record("point_recovery", point_recovery_start.elapsed());

        // 8. Update landmarks for every surviving tracked framepoint.
        for index in 0..current_points.len() {
            if current_points[index].previous.is_none() && !recovered.contains(&index) {
                continue;
            }
            self.update_or_create_landmark(current_frame, &mut current_points[index], landmarks, landmark_ids);
        }

        let tracking_ratio = result.inlier_ratio();
        self.stats.update(tracking_ratio, number_of_keypoints, current_points.len());

        let status = if succeeded && result.inlier_count() as u32 >= self.config.minimum_track_length.min(result.inlier_mask.len() as u32) {
            Status::Tracking
        } else {
            Self::break_track(current_points);
            Status::Localizing
        };
        current_frame.status = status;

        self.chronometers.record("tracking", stage_start.elapsed());
        TrackOutcome {
            status,
            number_of_recursive_registrations: recursions,
        }
    }

    fn finish_first_frame(&mut self, current_frame: &mut Frame, current_points: &mut [FramePoint], number_of_keypoints: usize) {
        current_frame.status = Status::Localizing;
        self.stats.update(0.0, number_of_keypoints, current_points.len());
    }

    /// Clears `previous` for every current framepoint: new tracks start from
    /// here.
    fn break_track(current_points: &mut [FramePoint]) {
        for point in current_points.iter_mut() {
            point.previous = None;
            point.origin = point.id;
            point.track_length = 1;
            point.landmark = None;
        }
    }

    fn project_previous_points(
        &self,
        previous: &Frame,
        previous_points: &[FramePoint],
        current_frame: &Frame,
        robot_to_camera: &Transform,
        camera: &Camera,
        image_size: (f32, f32),
    ) -> Vec<Projection> {
        let mut projections = Vec::with_capacity(previous_points.len());
        for (index, point) in previous_points.iter().enumerate() {
            let world_point = previous.robot_to_world().transform_vector(&point.robot_coordinates);
            let robot_point = current_frame.world_to_robot().transform_vector(&world_point);
            let camera_point = robot_to_camera.transform_vector(&robot_point);
            if camera_point.z <= 0.0 {
                continue;
            }
            let (row, col) = camera.project(&camera_point);
            if row < 0.0 || col < 0.0 || row >= image_size.0 || col >= image_size.1 {
                continue;
            }
            projections.push(Projection { previous_index: index, row, col });
        }
        projections
    }

    /// Bijective nearest-descriptor association within a square search
    /// window.
    fn associate(&self, projections: &[Projection], previous_points: &[FramePoint], current_points: &[FramePoint], radius: f32) -> Vec<(usize, usize)> {
        let mut candidates: Vec<(usize, usize, u32, f32)> = Vec::new();

        for projection in projections {
            let previous_point = &previous_points[projection.previous_index];
            for (current_index, current_point) in current_points.iter().enumerate() {
                let d_row = (current_point.keypoint_left.row - projection.row).abs();
                let d_col = (current_point.keypoint_left.col - projection.col).abs();
                if d_row > radius || d_col > radius {
                    continue;
                }
                let distance = previous_point.descriptor_left.hamming_distance(&current_point.descriptor_left);
                if distance > self.config.maximum_matching_distance_tracking {
                    continue;
                }
                let pixel_distance = (d_row * d_row + d_col * d_col).sqrt();
                candidates.push((projection.previous_index, current_index, distance, pixel_distance));
            }
        }

        if self.config.track_by_appearance {
            candidates.sort_by(|a, b| a.2.cmp(&b.2).then(a.3.partial_cmp(&b.3).unwrap()));
        } else {
            candidates.sort_by(|a, b| a.3.partial_cmp(&b.3).unwrap().then(a.2.cmp(&b.2)));
        }

        let mut used_previous = vec![false; previous_points.len()];
        let mut used_current = vec![false; current_points.len()];
        let mut associations = Vec::new();
        for (previous_index, current_index, ..) in candidates {
            if used_previous[previous_index] || used_current[current_index] {
                continue;
            }
            used_previous[previous_index] = true;
            used_current[current_index] = true;
            associations.push((previous_index, current_index));
        }
        associations
    }

    /// At most one association per image bin, keeping the smallest
    /// descriptor distance on contention.
    fn regularize_bins(&self, associations: Vec<(usize, usize)>, previous_points: &[FramePoint], current_points: &[FramePoint]) -> Vec<(usize, usize)> {
        let bin_size = self.config.bin_size_pixels;
        let mut best_per_bin: HashMap<(i32, i32), (usize, usize, u32)> = HashMap::new();

        for (previous_index, current_index) in associations {
            let current_point = &current_points[current_index];
            let bin = (
                (current_point.keypoint_left.row / bin_size).floor() as i32,
                (current_point.keypoint_left.col / bin_size).floor() as i32,
            );
            let distance = previous_points[previous_index].descriptor_left.hamming_distance(&current_point.descriptor_left);
            match best_per_bin.get(&bin) {
                Some((_, _, best_distance)) if *best_distance <= distance => {}
                _ => {
                    best_per_bin.insert(bin, (previous_index, current_index, distance));
                }
            }
        }

        best_per_bin.into_values().map(|(previous_index, current_index, _)| (previous_index, current_index)).collect()
    }

    /// Reprojects landmarks lost this frame and attempts a tight-radius
    /// match against framepoints that were not otherwise associated.
    /// Returns the indices of recovered framepoints.
    fn recover_points(
        &mut self,
        current_frame: &Frame,
        current_points: &mut [FramePoint],
        matched_current: &[bool],
        landmarks: &mut HashMap<LandmarkId, Landmark>,
        camera: &Camera,
        robot_to_camera: &Transform,
        image_size: (f32, f32),
    ) -> Vec<usize> {
        let mut recovered_indices = Vec::new();
        let mut used_current = matched_current.to_vec();

        let lost: Vec<LandmarkId> = landmarks
            .iter()
            .filter(|(_, landmark)| !landmark.is_currently_tracked)
            .map(|(id, _)| *id)
            .collect();

        for landmark_id in lost {
            let landmark = &landmarks[&landmark_id];
            let world_point = landmark.current.world_coordinates;
            let robot_point = current_frame.world_to_robot().transform_vector(&world_point);
            let camera_point = robot_to_camera.transform_vector(&robot_point);
            if camera_point.z <= 0.0 {
                continue;
            }
            let (row, col) = camera.project(&camera_point);
            if row < 0.0 || col < 0.0 || row >= image_size.0 || col >= image_size.1 {
                continue;
            }

            let mut best: Option<(usize, u32)> = None;
            for (index, point) in current_points.iter().enumerate() {
                if used_current[index] {
                    continue;
                }
                let d_row = (point.keypoint_left.row - row).abs();
                let d_col = (point.keypoint_left.col - col).abs();
                if d_row > self.config.recovery_search_radius_pixels || d_col > self.config.recovery_search_radius_pixels {
                    continue;
                }
                let distance = landmark
                    .current
                    .appearances
                    .iter()
                    .map(|appearance| appearance.hamming_distance(&point.descriptor_left))
                    .min()
                    .unwrap_or(u32::MAX);
                if distance > self.config.maximum_matching_distance_tracking {
                    continue;
                }
                if best.map(|(_, best_distance)| distance < best_distance).unwrap_or(true) {
                    best = Some((index, distance));
                }
            }

            if let Some((index, _)) = best {
                used_current[index] = true;
                current_points[index].landmark = Some(landmark_id);
                landmarks.get_mut(&landmark_id).unwrap().is_currently_tracked = true;
                landmarks.get_mut(&landmark_id).unwrap().number_of_recoveries += 1;
                recovered_indices.push(index);
            }
        }

        recovered_indices
    }

    fn update_or_create_landmark(
        &self,
        current_frame: &Frame,
        point: &mut FramePoint,
        landmarks: &mut HashMap<LandmarkId, Landmark>,
        landmark_ids: &mut IdCounter,
    ) {
        let world_coordinates = current_frame.robot_to_world().transform_vector(&point.robot_coordinates);
        let inverse_depth = Landmark::measurement_weight(point.depth_meters, self.landmark_config.maximum_weight);

        if let Some(landmark_id) = point.landmark {
            if let Some(landmark) = landmarks.get_mut(&landmark_id) {
                let measurement = Measurement {
                    world_to_camera: current_frame.world_to_robot().clone(),
                    camera_coordinates: point.camera_left_coordinates,
                    world_coordinates,
                    inverse_depth,
                };
                landmark.update(measurement, point.descriptor_left, self.landmark_config.maximum_descriptor_distance);
                return;
            }
        }

        if point.track_length >= self.config.minimum_track_length {
            let id = LandmarkId(landmark_ids.next());
            let landmark = Landmark::new(id, point.origin, world_coordinates, point.descriptor_left);
            landmarks.insert(id, landmark);
            point.landmark = Some(id);
        }
    }

}
