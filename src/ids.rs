//! Process-wide identifiers for frames, framepoints and landmarks.
//!
//! Frames, framepoints and landmarks are owned exclusively by the
//! [`crate::world_map::WorldMap`] registries; every other reference to them
//! (a framepoint's `previous`, a landmark handle on a framepoint, a local
//! map's closure edges) is a non-owning identifier resolved back through the
//! registry. This is a deliberate identifier-handle pattern, avoiding
//! back-reference cycles.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(FrameId, "Identifies a [`crate::frame::Frame`]. Never reused, monotonically increasing.");
define_id!(FramePointId, "Identifies a [`crate::framepoint::FramePoint`]. Never reused.");
define_id!(LandmarkId, "Identifies a [`crate::landmark::Landmark`]. Never reused, even across merges.");

/// A local map reuses its anchor frame's identifier space (a `LocalMap` *is*
/// a `Frame` that has been promoted), so this is a type alias rather than a
/// separate counter.
pub type LocalMapId = FrameId;

/// Monotonically increasing counter for one identifier kind.
///
/// Reset on construction of the owning registry; never thread-safe, since
/// the pipeline that drives it is single-threaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdCounter(u64);

impl IdCounter {
    pub fn new() -> Self {
        Self(0)
    }

    /// Returns the next identifier and advances the counter.
    pub fn next(&mut self) -> u64 {
        let id = self.0;
        self.0 += 1;
        id
    }

    /// Resets the counter to zero. Called by `WorldMap::new`.
    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_monotonic_and_resettable() {
        let mut counter = IdCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        counter.reset();
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn ids_compare_and_hash_by_value() {
        use std::collections::HashSet;
        let a = FrameId(3);
        let b = FrameId(3);
        let c = FrameId(4);
        assert_eq!(a, b);
        assert!(a < c);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }
}
