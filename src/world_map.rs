//! Owns all frames and landmarks; produces local maps at motion thresholds
//! and records closures.

use std::collections::HashMap;

use log::{debug, warn};

use crate::camera::StereoCamera;
use crate::chronometer::ChronometerRegistry;
use crate::config::SlamConfig;
use crate::frame::{Frame, Status};
use crate::framepoint::FramePoint;
use crate::ids::{FrameId, FramePointId, IdCounter, LandmarkId, LocalMapId};
use crate::landmark::Landmark;
use crate::local_map::{ClosureEdge, FrameRecord, LocalMapExtension};
use crate::stereo::{Observation, StereoTriangulator};
use crate::tracker::Tracker;
use crate::transform::Transform;

/// Owns the frame registry, the landmark registry, and the rolling window
/// used to decide local-map promotion.
pub struct WorldMap {
    config: SlamConfig,
    camera: StereoCamera,
    triangulator: StereoTriangulator,
    tracker: Tracker,
    chronometers: ChronometerRegistry,

    frame_ids: IdCounter,
    framepoint_ids: IdCounter,
    landmark_ids: IdCounter,

    frames: HashMap<FrameId, FrameRecord>,
    points: HashMap<FrameId, Vec<FramePoint>>,
    landmarks: HashMap<LandmarkId, Landmark>,

    /// Ingestion order; also the order local maps are appended (spec.md §5
    /// "Ordering guarantees").
    order: Vec<FrameId>,
    local_map_order: Vec<LocalMapId>,

    root: Option<FrameId>,
    current: Option<FrameId>,
    previous: Option<FrameId>,

    window: Vec<FrameId>,
    distance_traveled_window: f32,
    degrees_rotated_window: f32,

    /// Set by closure registration; cleared once consumed by the caller's
    /// optimizer trigger (spec.md §4.3 "Closure registration", §4.4
    /// "Trigger").
    relocalized: bool,
    number_of_closures: u32,
}

impl WorldMap {
    pub fn new(config: SlamConfig, camera: StereoCamera) -> Self {
        Self {
            triangulator: StereoTriangulator::new(config.triangulator),
            tracker: Tracker::new(config.tracker, config.aligner, config.landmark),
            chronometers: ChronometerRegistry::new(),
            config,
            camera,
            frame_ids: IdCounter::new(),
            framepoint_ids: IdCounter::new(),
            landmark_ids: IdCounter::new(),
            frames: HashMap::new(),
            points: HashMap::new(),
            landmarks: HashMap::new(),
            order: Vec::new(),
            local_map_order: Vec::new(),
            root: None,
            current: None,
            previous: None,
            window: Vec::new(),
            distance_traveled_window: 0.0,
            degrees_rotated_window: 0.0,
            relocalized: false,
            number_of_closures: 0,
        }
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(&id).map(|record| &record.core)
    }

    pub fn local_map_extension(&self, id: LocalMapId) -> Option<&LocalMapExtension> {
        self.frames.get(&id).and_then(|record| record.local_map_extension.as_ref())
    }

    pub fn points(&self, id: FrameId) -> &[FramePoint] {
        self.points.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn landmark(&self, id: LandmarkId) -> Option<&Landmark> {
        self.landmarks.get(&id)
    }

    pub fn landmarks(&self) -> &HashMap<LandmarkId, Landmark> {
        &self.landmarks
    }

    pub fn landmarks_mut(&mut self) -> &mut HashMap<LandmarkId, Landmark> {
        &mut self.landmarks
    }

    pub fn current_frame_id(&self) -> Option<FrameId> {
        self.current
    }

    pub fn root_frame_id(&self) -> Option<FrameId> {
        self.root
    }

    pub fn local_map_ids(&self) -> &[LocalMapId] {
        &self.local_map_order
    }

    pub fn frame_order(&self) -> &[FrameId] {
        &self.order
    }

    pub fn took_relocalized_since_last_check(&mut self) -> bool {
        std::mem::take(&mut self.relocalized)
    }

    /// Stage timers for introspection by a visualization/metrics collaborator
    /// (spec.md §9 "Global instance counter" note; original's
    /// `CREATE_CHRONOMETER` stages). Combines this map's own
    /// `point_triangulation` timings with the tracker's `tracking`,
    /// `pose_optimization` and `point_recovery` timings.
    pub fn chronometers(&self) -> &ChronometerRegistry {
        &self.chronometers
    }

    pub fn tracker_chronometers(&self) -> &ChronometerRegistry {
        self.tracker.chronometers()
    }

    /// Ingests one stereo frame: triangulates, tracks against the previous
    /// frame, and evaluates local-map promotion (spec.md §4.3 "Frame
    /// ingest").
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        robot_to_world_guess: Transform,
        left: &[Observation],
        right: &[Observation],
        image_size: (f32, f32),
        odometry_hint: Option<Transform>,
    ) -> FrameId {
        if let Some(previous_id) = self.current {
            if let Some(record) = self.frames.get_mut(&previous_id) {
                record.core.release_images();
            }
        }

        let id = FrameId(self.frame_ids.next());
        let mut frame = Frame::new(id, robot_to_world_guess, self.camera.left.clone(), self.camera.right.clone());
        frame.previous = self.current;

        let triangulation_start = std::time::Instant::now();
        let mut current_points = self.triangulator.compute(
            id,
            left,
            right,
            &self.camera,
            &mut self.framepoint_ids,
            self.config.local_map.maximum_depth_close,
        );
        self.chronometers.record("point_triangulation", triangulation_start.elapsed());
        debug!("frame {id}: triangulated {} framepoints", current_points.len());

        let outcome = match self.current {
            Some(previous_id) => {
                let previous_frame = self.frames[&previous_id].core.clone();
                let previous_points = self.points.get(&previous_id).cloned().unwrap_or_default();
                let outcome = self.tracker.track(
                    &previous_frame,
                    &previous_points,
                    &mut frame,
                    &mut current_points,
                    &mut self.landmarks,
                    &self.camera.left,
                    odometry_hint,
                    image_size,
                    &mut self.landmark_ids,
                );
                if outcome.status == Status::Localizing {
                    warn!("frame {id}: lost track, re-entering Localizing");
                }
                outcome
            }
            None => {
                frame.status = Status::Localizing;
                crate::tracker::TrackOutcome {
                    status: Status::Localizing,
                    number_of_recursive_registrations: 0,
                }
            }
        };
        let _ = outcome;

        if let Some(previous_id) = self.current {
            if let Some(record) = self.frames.get_mut(&previous_id) {
                record.core.next = Some(id);
            }
        }

        frame.points = current_points.iter().map(|p| p.id).collect();
        self.frames.insert(id, FrameRecord::new(frame));
        self.points.insert(id, current_points);
        self.order.push(id);
        self.window.push(id);

        if self.root.is_none() {
            self.root = Some(id);
        }
        self.previous = self.current;
        self.current = Some(id);

        self.evaluate_local_map_promotion();

        id
    }

    fn evaluate_local_map_promotion(&mut self) {
        let Some(current_id) = self.current else { return };
        let Some(previous_id) = self.previous else { return };

        let previous_robot_to_world = self.frames[&previous_id].core.robot_to_world().clone();
        let current_robot_to_world = self.frames[&current_id].core.robot_to_world().clone();
        let relative = &previous_robot_to_world.inverse() * &current_robot_to_world;

        self.distance_traveled_window += relative.translation().norm();
        self.degrees_rotated_window += relative.angle().to_degrees();

        let config = &self.config.local_map;
        let window_size = self.window.len() as u32;
        let should_promote = self.degrees_rotated_window > config.minimum_degrees_rotated
            || (self.distance_traveled_window > config.minimum_distance_traveled && window_size > config.minimum_number_of_frames)
            || (window_size > config.minimum_number_of_frames && self.local_map_order.len() < config.bootstrap_local_map_count);

        if should_promote {
            self.promote_current_frame_to_local_map();
        }
    }

    /// Replaces the current frame in the registry with a sealed local map,
    /// preserving its identifier and links (spec.md §4.3 "Local-map
    /// promotion", §9 "Polymorphic Frame vs LocalMap").
    fn promote_current_frame_to_local_map(&mut self) {
        let Some(current_id) = self.current else { return };

        let world_to_robot = self.frames[&current_id].core.world_to_robot().clone();
        let mut extension = LocalMapExtension::new(self.window.clone());

        let mut bound_landmarks: Vec<LandmarkId> = Vec::new();
        for frame_id in &self.window {
            let Some(points) = self.points.get(frame_id) else { continue };
            for point in points {
                let Some(landmark_id) = point.landmark else { continue };
                if bound_landmarks.contains(&landmark_id) {
                    continue;
                }
                let Some(landmark) = self.landmarks.get(&landmark_id) else { continue };
                let robot_coordinates = world_to_robot.transform_vector(&landmark.current.world_coordinates);
                extension.add_item(landmark_id, robot_coordinates);
                bound_landmarks.push(landmark_id);
            }
        }
        for landmark_id in &bound_landmarks {
            self.landmarks.get_mut(landmark_id).unwrap().bind_to_local_map(current_id);
        }

        if let Some(record) = self.frames.get_mut(&current_id) {
            record.core.bind_local_map(current_id, &world_to_robot);
            record.promote(extension);
        }
        self.local_map_order.push(current_id);

        self.reset_window_for_local_map_creation();
    }

    fn reset_window_for_local_map_creation(&mut self) {
        self.distance_traveled_window = 0.0;
        self.degrees_rotated_window = 0.0;

        if self.config.local_map.drop_framepoints {
            let keep_last = self.window.last().copied();
            for frame_id in self.window.drain(..) {
                if Some(frame_id) == keep_last {
                    continue;
                }
                if let Some(points) = self.points.get_mut(&frame_id) {
                    points.clear();
                }
                if let Some(record) = self.frames.get_mut(&frame_id) {
                    record.core.points.clear();
                }
            }
        } else {
            self.window.clear();
        }

        self.landmarks.retain(|_, landmark| !landmark.is_collectible());
    }

    /// Registers a closure edge from `query` to `reference` (spec.md §4.3
    /// "Closure registration").
    pub fn close_local_maps(&mut self, query: LocalMapId, reference: LocalMapId, transform_query_to_reference: Transform, confidence: f32) {
        if let Some(record) = self.frames.get_mut(&query) {
            if let Some(extension) = record.local_map_extension.as_mut() {
                extension.add_closure(query, reference, transform_query_to_reference, confidence);
            }
        }
        self.relocalized = true;
        self.number_of_closures += 1;
    }

    /// Fuses `from` into `into`: combines weight and measurement history,
    /// redirects every framepoint that referenced `from`, then retires
    /// `from`'s identifier. Used
    /// when a place-recognition closure identifies two landmarks, tracked
    /// independently in different local maps, as the same physical point.
    /// A no-op if either id is unknown or they are already the same landmark.
    pub fn merge_landmarks(&mut self, into: LandmarkId, from: LandmarkId) {
        if into == from {
            return;
        }
        let Some(donor) = self.landmarks.remove(&from) else { return };
        let Some(survivor) = self.landmarks.get_mut(&into) else {
            self.landmarks.insert(from, donor);
            return;
        };
        survivor.merge(donor);

        for points in self.points.values_mut() {
            for point in points.iter_mut() {
                if point.landmark == Some(from) {
                    point.landmark = Some(into);
                }
            }
        }
        debug!("merged landmark {from:?} into {into:?}");
    }

    pub fn closure_edges(&self, query: LocalMapId) -> Vec<ClosureEdge> {
        self.frames
            .get(&query)
            .and_then(|record| record.local_map_extension.as_ref())
            .map(|extension| extension.closures.clone())
            .unwrap_or_default()
    }

    pub fn number_of_closures(&self) -> u32 {
        self.number_of_closures
    }

    /// Rewrites a local map's pose after graph optimization and invalidates
    /// its cached inverse.
    pub fn set_local_map_pose(&mut self, id: LocalMapId, robot_to_world: Transform) {
        if let Some(record) = self.frames.get_mut(&id) {
            record.core.set_robot_to_world(robot_to_world);
        }
    }

    /// Snapshots the trajectory so far, one pose per ingested frame in
    /// ingestion order.
    pub fn trajectory(&self) -> crate::trajectory::Trajectory {
        let mut trajectory = crate::trajectory::Trajectory::new();
        for (index, frame_id) in self.order.iter().enumerate() {
            trajectory.push(self.frames[frame_id].core.robot_to_world().clone(), index as f32);
        }
        trajectory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraBuilder;
    use crate::descriptor::BinaryDescriptor;
    use crate::keypoint::Keypoint;

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

    fn stereo_pair() -> (Vec<Observation>, Vec<Observation>) {
        (vec![observation(240.0, 320.0, 1)], vec![observation(240.0, 220.0, 1)])
    }

    #[test]
    fn first_frame_is_root_and_localizing() {
        let mut world_map = WorldMap::new(SlamConfig::default(), stereo_camera());
        let (left, right) = stereo_pair();
        let id = world_map.step(Transform::eye(), &left, &right, (480.0, 640.0), None);

        assert_eq!(world_map.root_frame_id(), Some(id));
        assert_eq!(world_map.frame(id).unwrap().status, Status::Localizing);
        assert!(world_map.points(id)[0].is_origin());
        assert_eq!(world_map.chronometers().stage("point_triangulation").unwrap().count(), 1);
    }

    #[test]
    fn static_scene_creates_landmark_after_minimum_track_length() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut world_map = WorldMap::new(SlamConfig::default(), stereo_camera());
        let (left, right) = stereo_pair();

        for _ in 0..3 {
            world_map.step(Transform::eye(), &left, &right, (480.0, 640.0), None);
        }
        assert!(!world_map.landmarks().is_empty(), "a landmark should exist after minimum_track_length frames");

        for _ in 0..7 {
            world_map.step(Transform::eye(), &left, &right, (480.0, 640.0), None);
        }
        let landmark = world_map.landmarks().values().next().unwrap();
        assert!(landmark.number_of_updates >= 7, "expected several updates, got {}", landmark.number_of_updates);
    }

    #[test]
    fn unmatchable_frame_breaks_track_and_clears_landmarks_tracked_flag() {
        let mut world_map = WorldMap::new(SlamConfig::default(), stereo_camera());
        let (left, right) = stereo_pair();
        for _ in 0..3 {
            world_map.step(Transform::eye(), &left, &right, (480.0, 640.0), None);
        }

        let unmatchable_left = vec![observation(10.0, 600.0, 0xffff_ffff_ffff_ffff)];
        let unmatchable_right = vec![observation(10.0, 10.0, 0x0)];
        let id = world_map.step(Transform::eye(), &unmatchable_left, &unmatchable_right, (480.0, 640.0), None);

        assert_eq!(world_map.frame(id).unwrap().status, Status::Localizing);
        for point in world_map.points(id) {
            assert!(point.previous.is_none());
        }
    }

    #[test]
    fn merge_landmarks_redirects_framepoints_and_retires_donor() {
        use crate::landmark::Landmark;
        use nalgebra::Vector3;

        let mut world_map = WorldMap::new(SlamConfig::default(), stereo_camera());
        let (left, right) = stereo_pair();
        let id = world_map.step(Transform::eye(), &left, &right, (480.0, 640.0), None);

        let survivor_id = LandmarkId(100);
        let donor_id = LandmarkId(101);
        world_map
            .landmarks
            .insert(survivor_id, Landmark::new(survivor_id, FramePointId(0), Vector3::new(0.0, 0.0, 1.0), observation(0.0, 0.0, 1).descriptor));
        world_map
            .landmarks
            .insert(donor_id, Landmark::new(donor_id, FramePointId(1), Vector3::new(1.0, 0.0, 1.0), observation(0.0, 0.0, 2).descriptor));
        world_map.points.get_mut(&id).unwrap()[0].landmark = Some(donor_id);

        world_map.merge_landmarks(survivor_id, donor_id);

        assert!(world_map.landmarks().get(&donor_id).is_none());
        assert!(world_map.landmarks().get(&survivor_id).is_some());
        assert_eq!(world_map.points(id)[0].landmark, Some(survivor_id));
    }
}
