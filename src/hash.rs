//! Key hashing helper.

use std::hash::Hasher;

/// Hash arbitrary key bytes to the `u64` used throughout the core as the
/// content-map key and sketch input. Built on `ahash`, the same hasher
/// backing the partition's `hashbrown` map.
pub fn default_hash(key: &[u8]) -> u64 {
    let mut hasher = ahash::AHasher::default();
    hasher.write(key);
    hasher.finish()
}
