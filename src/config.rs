//! Configuration structs for every pipeline tunable.
//!
//! Following the teacher's `CameraBuilder`/`ICPParams` convention, these are
//! plain structs with a sensible `Default` and chainable setters rather than
//! a config-file loader: this crate is a library embedded by a harness, not
//! a standalone application.

use serde::{Deserialize, Serialize};

/// Stereo triangulation tunables.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TriangulatorConfig {
    pub minimum_disparity_pixels: f32,
    pub maximum_matching_distance_triangulation: u32,
    /// Row-band half-width for epipolar candidate search; 0 for perfectly
    /// rectified rigs.
    pub epipolar_row_tolerance: f32,
}

impl Default for TriangulatorConfig {
    fn default() -> Self {
        Self {
            minimum_disparity_pixels: 1.0,
            maximum_matching_distance_triangulation: 50,
            epipolar_row_tolerance: 1.0,
        }
    }
}

/// Tracker tunables.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub minimum_track_length: u32,
    pub projection_tracking_distance_pixels: f32,
    pub maximum_number_of_recursive_registrations: u32,
    pub maximum_matching_distance_tracking: u32,
    pub track_by_appearance: bool,
    pub enable_bin_regularization: bool,
    pub bin_size_pixels: f32,
    pub recovery_search_radius_pixels: f32,
    /// Minimum fraction of correspondences the aligner must keep as inliers.
    pub minimum_inlier_ratio: f32,
    /// Maximum acceptable mean-squared Huber-weighted residual.
    pub maximum_residual: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            minimum_track_length: 3,
            projection_tracking_distance_pixels: 7.0,
            maximum_number_of_recursive_registrations: 3,
            maximum_matching_distance_tracking: 50,
            track_by_appearance: false,
            enable_bin_regularization: false,
            bin_size_pixels: 16.0,
            recovery_search_radius_pixels: 4.0,
            minimum_inlier_ratio: 0.5,
            maximum_residual: 25.0,
        }
    }
}

/// Pose aligner tunables.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AlignerConfig {
    pub max_iterations: usize,
    pub huber_delta: f32,
    pub convergence_epsilon: f32,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            huber_delta: 1.0,
            convergence_epsilon: 1e-5,
        }
    }
}

/// Local-map promotion thresholds and memory policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LocalMapConfig {
    pub minimum_degrees_rotated: f32,
    pub minimum_distance_traveled: f32,
    pub minimum_number_of_frames: u32,
    /// Heuristic bootstrap clause: while fewer than this many local maps
    /// exist, a full window also triggers a seal regardless of the
    /// rotation/translation thresholds below.
    pub bootstrap_local_map_count: usize,
    pub maximum_depth_close: f32,
    pub drop_framepoints: bool,
}

impl Default for LocalMapConfig {
    fn default() -> Self {
        Self {
            minimum_degrees_rotated: 20.0,
            minimum_distance_traveled: 0.5,
            minimum_number_of_frames: 5,
            bootstrap_local_map_count: 5,
            maximum_depth_close: 5.0,
            drop_framepoints: true,
        }
    }
}

/// Graph optimizer tunables.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GraphOptimizerConfig {
    pub pose_graph_iterations: usize,
    pub odometry_information_scale: f32,
    /// Translational delta (meters) above which a closure is logged as
    /// high-impact but still accepted.
    pub large_closure_translation_threshold: f32,
    pub convergence_epsilon: f32,
}

impl Default for GraphOptimizerConfig {
    fn default() -> Self {
        Self {
            pose_graph_iterations: 10,
            odometry_information_scale: 1.0,
            large_closure_translation_threshold: 4.0,
            convergence_epsilon: 1e-9,
        }
    }
}

/// Landmark update weighting.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LandmarkConfig {
    pub maximum_weight: f32,
    pub maximum_descriptor_distance: u32,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            maximum_weight: 10.0,
            maximum_descriptor_distance: 50,
        }
    }
}

/// Aggregate configuration for the whole pipeline.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SlamConfig {
    pub triangulator: TriangulatorConfig,
    pub tracker: TrackerConfig,
    pub aligner: AlignerConfig,
    pub local_map: LocalMapConfig,
    pub graph_optimizer: GraphOptimizerConfig,
    pub landmark: LandmarkConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A hosting application saves/restores tuning as JSON;
    /// the derives above only earn their keep if this round-trips.
    #[test]
    fn slam_config_round_trips_through_json() {
        let mut config = SlamConfig::default();
        config.tracker.minimum_track_length = 7;
        config.local_map.maximum_depth_close = 42.0;

        let serialized = serde_json::to_string(&config).unwrap();
        let restored: SlamConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(restored.tracker.minimum_track_length, 7);
        assert_eq!(restored.local_map.maximum_depth_close, 42.0);
    }
}
