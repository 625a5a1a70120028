//! Persistent 3D landmarks and their weighted-average update rule.

use nalgebra::Vector3;

use crate::descriptor::BinaryDescriptor;
use crate::ids::{FramePointId, LandmarkId, LocalMapId};

/// One accumulated observation of a landmark.
#[derive(Clone, Copy, Debug)]
pub struct Measurement {
    pub world_to_camera: crate::transform::Transform,
    pub camera_coordinates: Vector3<f32>,
    pub world_coordinates: Vector3<f32>,
    pub inverse_depth: f32,
}

/// The mutable half of a landmark: current coordinates, binding, and the
/// appearances accumulated so far. Kept separate from [`Landmark`] so a
/// snapshot can be pushed onto `history` before each update, mirroring the
/// original's `State` nested type.
#[derive(Clone, Debug)]
pub struct State {
    pub world_coordinates: Vector3<f32>,
    pub local_map: Option<LocalMapId>,
    pub appearances: Vec<BinaryDescriptor>,
}

/// Persistent 3D point in world coordinates, re-observed across many frames.
#[derive(Clone, Debug)]
pub struct Landmark {
    pub id: LandmarkId,
    pub origin: FramePointId,

    pub current: State,
    pub history: Vec<State>,

    pub measurements: Vec<Measurement>,
    pub total_weight: f32,
    pub number_of_updates: u32,
    pub number_of_recoveries: u32,

    pub is_currently_tracked: bool,
    pub is_optimized: bool,
    pub is_closed: bool,
}

impl Landmark {
    /// Creates a landmark anchored at a framepoint that just survived
    /// `minimum_track_length`.
    pub fn new(id: LandmarkId, origin: FramePointId, world_coordinates: Vector3<f32>, first_appearance: BinaryDescriptor) -> Self {
        Self {
            id,
            origin,
            current: State {
                world_coordinates,
                local_map: None,
                appearances: vec![first_appearance],
            },
            history: Vec::new(),
            measurements: Vec::new(),
            total_weight: 0.0,
            number_of_updates: 0,
            number_of_recoveries: 0,
            is_currently_tracked: true,
            is_optimized: false,
            is_closed: false,
        }
    }

    /// Per-measurement weight: inverse depth clamped to `maximum_weight`.
    pub fn measurement_weight(depth_meters: f32, maximum_weight: f32) -> f32 {
        (1.0 / depth_meters).min(maximum_weight)
    }

    /// Appends a measurement and recomputes `world_coordinates` as the
    /// running weighted average.
    pub fn update(&mut self, measurement: Measurement, appearance: BinaryDescriptor, maximum_descriptor_distance: u32) {
        self.history.push(self.current.clone());

        let weight = measurement.inverse_depth;
        let new_total = self.total_weight + weight;
        self.current.world_coordinates =
            (self.current.world_coordinates * self.total_weight + measurement.world_coordinates * weight) / new_total;
        self.total_weight = new_total;

        self.record_appearance(appearance, maximum_descriptor_distance);
        self.measurements.push(measurement);
        self.number_of_updates += 1;
    }

    /// Adds `appearance` unless an existing appearance is already within
    /// `maximum_descriptor_distance`.
    pub fn record_appearance(&mut self, appearance: BinaryDescriptor, maximum_descriptor_distance: u32) {
        let already_known = self
            .current
            .appearances
            .iter()
            .any(|known| known.is_duplicate_of(&appearance, maximum_descriptor_distance));
        if !already_known {
            self.current.appearances.push(appearance);
        }
    }

    /// Recomputes `world_coordinates` from `item.robot_coordinates` at
    /// graph-optimizer writeback time.
    /// The measurement history is left untouched: this is a coordinate
    /// transport, not a new observation.
    pub fn reset_coordinates(&mut self, world_coordinates: Vector3<f32>) {
        self.current.world_coordinates = world_coordinates;
        self.is_optimized = true;
        self.is_closed = true;
    }

    pub fn bind_to_local_map(&mut self, local_map: LocalMapId) {
        self.current.local_map = Some(local_map);
    }

    /// Whether this landmark is eligible for garbage collection at local-map
    /// sealing: not tracked and not bound to any local map.
    pub fn is_collectible(&self) -> bool {
        !self.is_currently_tracked && self.current.local_map.is_none()
    }

    /// Merges `other` into `self`: combines weight and measurement history.
    /// The caller is responsible for redirecting every framepoint that
    /// referenced `other.id` and then retiring `other.id` from the registry.
    pub fn merge(&mut self, other: Landmark) {
        let new_total = self.total_weight + other.total_weight;
        if new_total > 0.0 {
            self.current.world_coordinates = (self.current.world_coordinates * self.total_weight
                + other.current.world_coordinates * other.total_weight)
                / new_total;
        }
        self.total_weight = new_total;
        self.measurements.extend(other.measurements);
        self.number_of_updates += other.number_of_updates;
        self.number_of_recoveries += other.number_of_recoveries;
        for appearance in other.current.appearances {
            self.record_appearance(appearance, 0);
        }
        self.is_currently_tracked = self.is_currently_tracked || other.is_currently_tracked;
    }
}
