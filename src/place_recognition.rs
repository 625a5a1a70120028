//! Place-recognition collaborator interface and the closure-transform
//! estimator the core runs on its output.
//!
//! The descriptor-matching backend itself (bag-of-words, vocabulary tree,
//! whatever) is out of scope — an external collaborator implements
//! [`PlaceRecognizer`] and is invoked by the driving harness after each
//! local-map sealing. What belongs to the core, and is implemented here, is
//! turning the backend's matched descriptor pairs into a rigid transform:
//! RANSAC over minimal 3-point samples, each scored by a Kabsch absolute
//! orientation fit, refined over the inlier set.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};
use rand::Rng;

use crate::ids::LocalMapId;
use crate::transform::Transform;

/// One descriptor match between the sealing local map ("query") and an
/// earlier one ("reference"), reduced to the 3D robot-frame coordinates of
/// the two landmarks the matched descriptors belong to.
#[derive(Clone, Copy, Debug)]
pub struct MatchedPair {
    pub query_point: Vector3<f32>,
    pub reference_point: Vector3<f32>,
}

/// One revisit candidate reported by the place-recognition backend.
#[derive(Clone, Debug)]
pub struct ClosureCandidate {
    pub reference_local_map: LocalMapId,
    pub matched_pairs: Vec<MatchedPair>,
}

/// External descriptor-matching collaborator. Implemented by
/// the embedding harness, not this crate; `history` is every local map
/// sealed strictly before `query`.
pub trait PlaceRecognizer {
    fn recognize(&mut self, query: LocalMapId, history: &[LocalMapId]) -> Vec<ClosureCandidate>;
}

#[derive(Clone, Copy, Debug)]
pub struct PlaceRecognitionConfig {
    pub ransac_iterations: usize,
    pub inlier_threshold_meters: f32,
    pub minimum_inliers: usize,
}

impl Default for PlaceRecognitionConfig {
    fn default() -> Self {
        Self {
            ransac_iterations: 200,
            inlier_threshold_meters: 0.2,
            minimum_inliers: 6,
        }
    }
}

/// RANSAC + 3-point absolute orientation on `candidate.matched_pairs`,
/// returning the transform mapping query points into the reference frame —
/// the caller passes this straight to `WorldMap::close_local_maps`. `None`
/// when too few matches or no sample clears `minimum_inliers`.
pub fn estimate_closure_transform(candidate: &ClosureCandidate, config: &PlaceRecognitionConfig) -> Option<Transform> {
    let pairs = &candidate.matched_pairs;
    if pairs.len() < 3 {
        return None;
    }

    let mut rng = rand::thread_rng();
    let mut best_inliers: Vec<usize> = Vec::new();

    for _ in 0..config.ransac_iterations {
        let sample = rand::seq::index::sample(&mut rng, pairs.len(), 3);
        let source: Vec<Vector3<f32>> = sample.iter().map(|i| pairs[i].query_point).collect();
        let target: Vec<Vector3<f32>> = sample.iter().map(|i| pairs[i].reference_point).collect();
        let Some(candidate_transform) = absolute_orientation(&source, &target) else {
            continue;
        };

        let inliers: Vec<usize> = pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| {
                let predicted = candidate_transform.transform_vector(&pair.query_point);
                (predicted - pair.reference_point).norm() < config.inlier_threshold_meters
            })
            .map(|(i, _)| i)
            .collect();

        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
        }
    }

    if best_inliers.len() < config.minimum_inliers {
        return None;
    }

    let source: Vec<Vector3<f32>> = best_inliers.iter().map(|&i| pairs[i].query_point).collect();
    let target: Vec<Vector3<f32>> = best_inliers.iter().map(|&i| pairs[i].reference_point).collect();
    absolute_orientation(&source, &target)
}

/// Kabsch's algorithm: the rigid transform minimizing `Σ|R·source+t -
/// target|²` over a point correspondence set, via SVD of the cross-
/// covariance matrix.
fn absolute_orientation(source: &[Vector3<f32>], target: &[Vector3<f32>]) -> Option<Transform> {
    let n = source.len();
    if n == 0 || n != target.len() {
        return None;
    }

    let source_centroid = source.iter().sum::<Vector3<f32>>() / n as f32;
    let target_centroid = target.iter().sum::<Vector3<f32>>() / n as f32;

    let mut cross_covariance = Matrix3::zeros();
    for (s, t) in source.iter().zip(target.iter()) {
        let sc = s - source_centroid;
        let tc = t - target_centroid;
        cross_covariance += tc * sc.transpose();
    }

    let svd = cross_covariance.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let determinant_sign = (u * v_t).determinant().signum();
    let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, determinant_sign));
    let rotation_matrix = u * correction * v_t;

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));
    let translation = target_centroid - rotation_matrix * source_centroid;

    Some(Transform(Isometry3::from_parts(Translation3::from(translation), rotation)))
}
