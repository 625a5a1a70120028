//! Raw keypoint observations consumed from the image-processing collaborator.
//! The core never detects keypoints itself.

use serde::{Deserialize, Serialize};

/// A single detected keypoint in one image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub row: f32,
    pub col: f32,
    pub response: f32,
    pub octave: i32,
}

impl Keypoint {
    pub fn new(row: f32, col: f32) -> Self {
        Self {
            row,
            col,
            response: 0.0,
            octave: 0,
        }
    }

    pub fn pixel_distance(&self, other: &Self) -> f32 {
        ((self.row - other.row).powi(2) + (self.col - other.col).powi(2)).sqrt()
    }
}
