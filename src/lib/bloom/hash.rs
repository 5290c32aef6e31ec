//! Double hashing over a single 128-bit murmur3 evaluation.
//!
//! k index streams are derived as `h1 + i * h2` from one hash of the key,
//! which has the same asymptotic behaviour as k independent hashes
//! (Kirsch & Mitzenmacher 2006).

use std::io::Cursor;

use murmur3::murmur3_x64_128;

/// Seed fixed for the lifetime of the process. Changing it would invalidate
/// persisted filter state, of which there is none.
const SEED: u32 = 43;

/// The two 64-bit halves of one murmur3 x64_128 evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DoubleHash {
    h1: u64,
    h2: u64,
}

impl DoubleHash {
    /// Hashes `key` once.
    #[must_use]
    pub fn new(key: &[u8]) -> Self {
        let h = murmur3_x64_128(&mut Cursor::new(key), SEED).unwrap_or(0);
        Self { h1: h as u64, h2: (h >> 64) as u64 }
    }

    /// The i-th derived hash value, prior to range reduction.
    #[inline]
    #[must_use]
    pub fn index(&self, i: u32) -> u64 {
        self.h1.wrapping_add(u64::from(i).wrapping_mul(self.h2))
    }
}
