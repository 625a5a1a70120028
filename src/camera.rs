use nalgebra::Vector3;

use crate::transform::Transform;

/// A single pinhole camera: intrinsics plus its extrinsic mount on the robot
/// rig (`camera_to_robot`, mapping the camera-left/camera-right frame into
/// the robot frame).
#[derive(Clone, Debug)]
pub struct Camera {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    /// Maps points expressed in this camera's frame to the robot frame.
    pub camera_to_robot: Transform,
}

pub struct CameraBuilder(Camera);

impl CameraBuilder {
    pub fn from_simple_intrinsics(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self(Camera {
            fx,
            fy,
            cx,
            cy,
            camera_to_robot: Transform::eye(),
        })
    }

    pub fn camera_to_robot(&'_ mut self, value: Transform) -> &'_ mut CameraBuilder {
        self.0.camera_to_robot = value;
        self
    }

    pub fn build(&self) -> Camera {
        self.0.clone()
    }
}

impl Camera {
    /// Back-projects a pixel + depth into this camera's 3D frame.
    pub fn backproject(&self, row: f32, col: f32, depth: f32) -> Vector3<f32> {
        Vector3::new(
            (col - self.cx) * depth / self.fx,
            (row - self.cy) * depth / self.fy,
            depth,
        )
    }

    /// Projects a 3D point in this camera's frame to a pixel (row, col).
    pub fn project(&self, point: &Vector3<f32>) -> (f32, f32) {
        let row = (point.y * self.fy + self.cy * point.z) / point.z;
        let col = (point.x * self.fx + self.cx * point.z) / point.z;
        (row, col)
    }
}

/// A rectified stereo pair: identical focal length, horizontal baseline
/// between the two optical centers.
#[derive(Clone, Debug)]
pub struct StereoCamera {
    pub left: Camera,
    pub right: Camera,
    pub baseline_meters: f32,
}

impl StereoCamera {
    pub fn new(left: Camera, right: Camera, baseline_meters: f32) -> Self {
        Self {
            left,
            right,
            baseline_meters,
        }
    }

    /// Depth from disparity: `z = f * b / d`.
    pub fn depth_from_disparity(&self, disparity_pixels: f32) -> f32 {
        self.left.fx * self.baseline_meters / disparity_pixels
    }

    /// Back-projects a left-image pixel with the given disparity into the
    /// camera-left 3D frame.
    pub fn triangulate(&self, row: f32, col: f32, disparity_pixels: f32) -> Vector3<f32> {
        let depth = self.depth_from_disparity(disparity_pixels);
        self.left.backproject(row, col, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn triangulate_matches_known_disparity() {
        // f=500, baseline=0.5m, disparity=100px.
        let left = CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build();
        let right = CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build();
        let stereo = StereoCamera::new(left, right, 0.5);

        let point = stereo.triangulate(240.0, 320.0, 100.0);
        assert_relative_eq!(point.z, 2.5, epsilon = 1e-6);
        assert_relative_eq!(point.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(point.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn project_is_inverse_of_backproject() {
        let cam = CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build();
        let point = cam.backproject(100.0, 200.0, 3.0);
        let (row, col) = cam.project(&point);
        assert_relative_eq!(row, 100.0, epsilon = 1e-4);
        assert_relative_eq!(col, 200.0, epsilon = 1e-4);
    }
}
