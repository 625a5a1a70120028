//! Error taxonomy.
//!
//! Transient conditions (no stereo matches, alignment non-convergence, a
//! closure RANSAC that never reaches consensus) are not modeled as `Error`
//! variants: they're ordinary values already — an empty `Vec<FramePoint>`
//! from [`crate::stereo::StereoTriangulator::compute`], `None` from
//! [`crate::place_recognition::estimate_closure_transform`], or a
//! `Status::Localizing` transition in [`crate::tracker::Tracker::track`].
//! Invariant violations (duplicate frame identifier, dangling framepoint
//! predecessor, missing landmark anchor) are programmer errors and are
//! surfaced with `assert!`/`debug_assert!` at the violation site instead —
//! wrapping those in a `Result` would let a caller "handle" corrupted state
//! that cannot be safely continued.
//!
//! `Error` itself is reserved for the one kind of failure that genuinely
//! crosses a `Result` boundary: I/O.
use thiserror::Error;

/// Errors produced by the pipeline's I/O boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Writing the trajectory file failed.
    #[error("trajectory I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
