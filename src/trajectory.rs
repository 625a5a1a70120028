use crate::transform::Transform;

#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    pub camera_to_world: Vec<Transform>,
    pub times: Vec<f32>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self {
            camera_to_world: Vec::new(),
            times: Vec::new(),
        }
    }

    /// Writes one line per pose: 12 space-separated doubles forming the
    /// first three rows of the 4x4 pose matrix, row-major (spec.md §6
    /// "Trajectory output"; format follows `world_map.cpp::writeTrajectory`).
    pub fn write_kitti(&self, path: &std::path::Path) -> Result<(), crate::error::Error> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        for pose in &self.camera_to_world {
            let matrix: nalgebra::Matrix4<f32> = pose.into();
            for row in 0..3 {
                for col in 0..4 {
                    write!(file, "{} ", matrix[(row, col)])?;
                }
            }
            writeln!(file)?;
        }
        Ok(())
    }

    pub fn push(&mut self, camera_to_world: Transform, time: f32) {
        self.camera_to_world.push(camera_to_world);
        self.times.push(time);
    }

    pub fn len(&self) -> usize {
        self.camera_to_world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.camera_to_world.is_empty()
    }

    pub fn get_relative_transform(&self, from_time: f32, to_time: f32) -> Option<Transform> {
        let (i_src, i_dst) = self.get_indices(from_time, to_time)?;
        Some(&self.camera_to_world[i_dst].inverse() * &self.camera_to_world[i_src])
    }

    pub fn get_indices(&self, time_src: f32, time_dst: f32) -> Option<(usize, usize)> {
        let i_src = self.times.iter().position(|t| *t == time_src)?;
        let i_dst = self.times.iter().position(|t| *t == time_dst)?;
        Some((i_src, i_dst))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Transform, f32)> + '_ {
        self.camera_to_world
            .iter()
            .zip(self.times.iter())
            .map(|(camera_to_world, time)| (camera_to_world.clone(), *time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn write_kitti_emits_one_line_of_twelve_numbers_per_pose() {
        let mut trajectory = Trajectory::new();
        trajectory.push(Transform::eye(), 0.0);
        trajectory.push(
            crate::transform::TransformBuilder::default().translation(Vector3::new(1.0, 2.0, 3.0)).build(),
            1.0,
        );

        let path = std::env::temp_dir().join(format!("stereoslam_trajectory_test_{:?}.txt", std::thread::current().id()));
        trajectory.write_kitti(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(line.split_whitespace().count(), 12);
        }
        let last_row: Vec<f32> = lines[1].split_whitespace().map(|v| v.parse().unwrap()).collect();
        assert_eq!(last_row[3], 1.0);
        assert_eq!(last_row[7], 2.0);
        assert_eq!(last_row[11], 3.0);
    }
}
