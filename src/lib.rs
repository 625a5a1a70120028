pub mod aligner;
pub mod camera;
pub mod chronometer;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod framepoint;
pub mod graph_optimizer;
pub mod ids;
pub mod keypoint;
pub mod landmark;
pub mod local_map;
pub mod optim;
pub mod place_recognition;
pub mod stereo;
pub mod tracker;
pub mod trajectory;
pub mod transform;
pub mod world_map;
