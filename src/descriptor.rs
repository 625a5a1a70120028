//! Fixed-width binary descriptors and Hamming-distance matching.
//!
//! The core consumes pre-extracted binary descriptors; it never computes
//! them. A 256-bit width is the common case for ORB/BRIEF-style descriptors.

use serde::{Deserialize, Serialize};

/// A fixed-width binary descriptor, compared by Hamming distance.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryDescriptor(pub [u64; 4]);

impl BinaryDescriptor {
    pub const BITS: u32 = 256;

    pub fn zero() -> Self {
        Self([0; 4])
    }

    /// Number of differing bits between `self` and `other`.
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Whether `other` is close enough to be considered the same appearance,
    /// used to deduplicate a landmark's accumulated appearances.
    pub fn is_duplicate_of(&self, other: &Self, maximum_distance: u32) -> bool {
        self.hamming_distance(other) <= maximum_distance
    }
}

impl std::fmt::Debug for BinaryDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BinaryDescriptor({:016x}{:016x}{:016x}{:016x})", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_descriptors_have_zero_distance() {
        let a = BinaryDescriptor([1, 2, 3, 4]);
        assert_eq!(a.hamming_distance(&a), 0);
        assert!(a.is_duplicate_of(&a, 0));
    }

    #[test]
    fn single_bit_flip_has_distance_one() {
        let a = BinaryDescriptor([0, 0, 0, 0]);
        let b = BinaryDescriptor([1, 0, 0, 0]);
        assert_eq!(a.hamming_distance(&b), 1);
        assert!(!a.is_duplicate_of(&b, 0));
        assert!(a.is_duplicate_of(&b, 1));
    }

    #[rstest::rstest]
    #[case([0, 0, 0, 0], [0, 0, 0, 0], 0)]
    #[case([0xff, 0, 0, 0], [0, 0, 0, 0], 8)]
    #[case([1, 1, 0, 0], [0, 0, 1, 0], 3)]
    #[case([u64::MAX, u64::MAX, u64::MAX, u64::MAX], [0, 0, 0, 0], 256)]
    fn hamming_distance_matches_expected(#[case] left: [u64; 4], #[case] right: [u64; 4], #[case] expected: u32) {
        let a = BinaryDescriptor(left);
        let b = BinaryDescriptor(right);
        assert_eq!(a.hamming_distance(&b), expected);
        assert_eq!(b.hamming_distance(&a), expected, "hamming distance must be symmetric");
    }
}
