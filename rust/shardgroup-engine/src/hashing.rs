//! Salted consistent hashing for random regroups.
//!
//! A term hashes to the same 64-bit value whether it is read from the term
//! dictionary or from a metric, so both random regroup flavours agree on
//! every document.

use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

/// Hashes term values under a salt.
#[derive(Debug, Clone, Copy)]
pub struct TermHasher {
    seed: u64,
}

impl TermHasher {
    pub fn new(salt: &str) -> TermHasher {
        TermHasher {
            seed: xxh3_64(salt.as_bytes()),
        }
    }

    #[inline]
    pub fn hash_int(&self, value: i64) -> u64 {
        xxh3_64_with_seed(&value.to_le_bytes(), self.seed)
    }

    #[inline]
    pub fn hash_str(&self, value: &str) -> u64 {
        xxh3_64_with_seed(value.as_bytes(), self.seed)
    }
}

/// Maps a 64-bit hash to a bucket through ascending cumulative fractions.
///
/// With fractions `[p0, p1, ..]`, hashes below `p0 * 2^64` land in bucket 0,
/// those below `p1 * 2^64` in bucket 1, and the rest in the last bucket.
#[derive(Debug, Clone)]
pub struct GroupChooser {
    thresholds: Vec<u128>,
}

impl GroupChooser {
    /// `percentages` must already be validated as ascending within `[0, 1]`.
    pub fn new(percentages: &[f64]) -> GroupChooser {
        const SCALE: f64 = 18_446_744_073_709_551_616.0; // 2^64
        GroupChooser {
            thresholds: percentages.iter().map(|&p| (p * SCALE) as u128).collect(),
        }
    }

    #[inline]
    pub fn choose(&self, hash: u64) -> usize {
        let hash = hash as u128;
        self.thresholds.partition_point(|&t| t <= hash)
    }

    pub fn num_buckets(&self) -> usize {
        self.thresholds.len() + 1
    }
}
