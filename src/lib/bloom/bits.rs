//! Dense atomic bit vector shared across worker threads.
//!
//! Bits are packed into 64-bit words. Mutation happens only through
//! [`AtomicBitArray::set_if_unset`], so a bit can transition 0 to 1 exactly
//! once and never back. That monotonicity is what makes the enclosing Bloom
//! filter safe to share without locks.

use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed-width bit vector with atomic test-and-set.
///
/// All indices are `u64` because the enclosing filter may be sized past
/// 2^32 bits. Word-internal bit order is LSB-first and stable.
pub struct AtomicBitArray {
    words: Vec<AtomicU64>,
    len: u64,
}

impl AtomicBitArray {
    /// Creates a zeroed bit array holding `len` bits.
    #[must_use]
    pub fn new(len: u64) -> Self {
        let n_words = usize::try_from(len.div_ceil(64)).expect("bit array exceeds address space");
        let words = std::iter::repeat_with(|| AtomicU64::new(0)).take(n_words).collect();
        Self { words, len }
    }

    /// Number of bits in the array.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if the array holds no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Atomically sets the bit at `index`, returning `true` iff this call
    /// performed the 0 to 1 transition.
    ///
    /// Wait-free: a single `fetch_or` on the containing word. Under
    /// concurrent callers exactly one observes the transition.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    pub fn set_if_unset(&self, index: u64) -> bool {
        assert!(index < self.len, "bit index {index} out of range ({})", self.len);
        let mask = 1u64 << (index % 64);
        let prev = self.words[(index / 64) as usize].fetch_or(mask, Ordering::AcqRel);
        prev & mask == 0
    }

    /// Reads the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[inline]
    #[must_use]
    pub fn test(&self, index: u64) -> bool {
        assert!(index < self.len, "bit index {index} out of range ({})", self.len);
        let mask = 1u64 << (index % 64);
        self.words[(index / 64) as usize].load(Ordering::Acquire) & mask != 0
    }

    /// Total number of set bits. Snapshot semantics: concurrent writers may
    /// make the result stale by the time it returns.
    #[must_use]
    pub fn popcount(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.load(Ordering::Relaxed).count_ones())).sum()
    }
}
