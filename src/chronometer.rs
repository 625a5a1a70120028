//! Informative-only stage timers.
//!
//! The original implementation wraps each pipeline stage
//! (`feature_detection`, `point_triangulation`, `tracking`,
//! `pose_optimization`, ...) in a named stopwatch purely for introspection —
//! see `original_source/src/triangulation/stereo_triangulator.h` and
//! `base_tracker.h`'s `CREATE_CHRONOMETER` macros. Nothing here influences
//! control flow.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Accumulates wall-clock time spent in one named stage across frames.
#[derive(Debug, Clone, Default)]
pub struct Chronometer {
    total: Duration,
    count: u64,
}

impl Chronometer {
    pub fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.count += 1;
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// A named collection of chronometers, one per pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct ChronometerRegistry {
    stages: HashMap<&'static str, Chronometer>,
}

impl ChronometerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Times `work` under the named stage and records its elapsed duration.
    pub fn time<T>(&mut self, stage: &'static str, work: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = work();
        self.record(stage, start.elapsed());
        result
    }

    /// Records an already-measured duration under the named stage. Useful
    /// when the timed section can't be expressed as a single closure
    /// because it needs other fields of the caller borrowed mutably.
    pub fn record(&mut self, stage: &'static str, elapsed: Duration) {
        self.stages.entry(stage).or_default().record(elapsed);
    }

    pub fn stage(&self, stage: &str) -> Option<&Chronometer> {
        self.stages.get(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn records_elapsed_time_and_count() {
        let mut registry = ChronometerRegistry::new();
        registry.time("tracking", || sleep(Duration::from_millis(1)));
        registry.time("tracking", || sleep(Duration::from_millis(1)));

        let stage = registry.stage("tracking").unwrap();
        assert_eq!(stage.count(), 2);
        assert!(stage.total() >= Duration::from_millis(2));
        assert!(registry.stage("pose_optimization").is_none());
    }
}
