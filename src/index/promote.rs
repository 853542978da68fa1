//! Deterministic, content-addressed level promotion.

use siphasher::sip::SipHasher13;
use std::hash::Hasher;

use crate::key::Key;

/// Computes a deterministic SipHash64 over the key's encoding.
///
/// Zero keys make the hash seed-free, so promotion decisions are identical
/// across processes, restarts and rebuilds.
pub fn key_hash64(key: &Key) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(&key.encoded());
    hasher.finish()
}

/// Returns true when `key` owns an entry at `level`.
///
/// A key is promoted to level `L` when the low `L * fanout_exponent` bits of
/// its hash are all zero, so promotion to `L` implies promotion to every
/// level below it.
pub fn is_promoted(key: &Key, level: u8, fanout_exponent: u8) -> bool {
    level == 0 || key_hash64(key) & level_mask(level, fanout_exponent) == 0
}

/// Highest level in `0..=max_level` that `key` is promoted to.
pub fn top_level(key: &Key, max_level: u8, fanout_exponent: u8) -> u8 {
    let hash = key_hash64(key);
    (1..=max_level)
        .take_while(|&level| hash & level_mask(level, fanout_exponent) == 0)
        .last()
        .unwrap_or(0)
}

fn level_mask(level: u8, fanout_exponent: u8) -> u64 {
    let bits = u32::from(level) * u32::from(fanout_exponent);
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}
