//! A Bloom filter keyed by template fingerprints.
//!
//! The filter is sized analytically from the expected item count `n` and the
//! target false positive rate `p`, or from an explicit memory budget. All
//! mutation goes through atomic word operations, so one filter instance is
//! shared by every worker thread without locks.
//!
//! Membership answers are one-sided: `contains` never returns `false` for a
//! key that was added (no false negatives), and returns `true` for absent
//! keys with probability bounded by the design `p` at design load.

pub mod bits;
pub mod hash;

use crate::errors::{FgmarkError, Result};
use bits::AtomicBitArray;
use hash::DoubleHash;

/// Largest hash count considered when solving `k` for a fixed memory budget.
pub const KMAX: u32 = 100;

/// A shared, thread-safe Bloom filter.
///
/// The sizing tuple `(n, p, m, k)` is immutable after construction; the bit
/// array only ever transitions bits 0 to 1.
pub struct BloomFilter {
    n: u64,
    p: f64,
    m: u64,
    k: u32,
    /// `Some(m - 1)` when `m` is a power of two; index reduction is then a
    /// mask instead of a modulo.
    mask: Option<u64>,
    bits: AtomicBitArray,
}

impl BloomFilter {
    /// Creates a filter with the memory-optimal `(m, k)` for `(n, p)`.
    pub fn new(n: u64, p: f64) -> Result<Self> {
        validate_targets(n, p)?;
        let (m, k) = Self::m_k_min(n, p);
        Ok(Self::allocate(n, p, m, k))
    }

    /// Creates a filter occupying `mem_bytes` of bit storage, solving for the
    /// smallest `k` that still meets `(n, p)`.
    ///
    /// # Errors
    ///
    /// [`FgmarkError::NoMemorySolution`] when no `k <= KMAX` meets the target
    /// within the budget. The error carries the minimum feasible memory.
    pub fn with_mem(n: u64, p: f64, mem_bytes: u64) -> Result<Self> {
        validate_targets(n, p)?;
        let (m, k) = Self::m_k_mem(n, p, mem_bytes)?;
        Ok(Self::allocate(n, p, m, k))
    }

    fn allocate(n: u64, p: f64, m: u64, k: u32) -> Self {
        let mask = if m.is_power_of_two() { Some(m - 1) } else { None };
        Self { n, p, m, k, mask, bits: AtomicBitArray::new(m) }
    }

    /// Memory-optimal `(m, k)` for a filter holding `n` items at false
    /// positive rate `p`. Does not allocate.
    ///
    /// `m` is the smallest width satisfying `m >= -n ln(p) / ln(2)^2` and
    /// `k = ceil(ln(2) m / n)`, clamped to at least 1.
    #[must_use]
    pub fn m_k_min(n: u64, p: f64) -> (u64, u32) {
        let ln2 = std::f64::consts::LN_2;
        // The numerator is evaluated in single precision; the published
        // sizing tables depend on that rounding.
        let bits = f64::from((-(n as f64) * p.ln()) as f32);
        let m = (bits / (ln2 * ln2)).ceil() as u64;
        let k = ((ln2 * m as f64 / n as f64).ceil() as u32).max(1);
        (m, k)
    }

    /// `(m, k)` for a filter constrained to `mem_bytes` of bit storage.
    ///
    /// `m` is fixed at `mem_bytes * 8`; there is no closed form for `k`, so
    /// the smallest `k` with a theoretical false positive rate under `p` is
    /// found by evaluation. For fixed `n` and `p`, `k` is highly sensitive to
    /// `m` near the optimum: a slightly larger budget often buys a much
    /// smaller `k`.
    pub fn m_k_mem(n: u64, p: f64, mem_bytes: u64) -> Result<(u64, u32)> {
        let m = mem_bytes.saturating_mul(8);
        let no_solution = || {
            let (min_m, _) = Self::m_k_min(n, p);
            FgmarkError::NoMemorySolution { mem: mem_bytes, n, p, kmax: KMAX, min_mem: min_m.div_ceil(8) }
        };
        if m == 0 {
            return Err(no_solution());
        }
        let mf = m as f64;
        for k in 1..=KMAX {
            let fpr = (1.0 - (1.0 - 1.0 / mf).powf(f64::from(k) * n as f64)).powf(f64::from(k));
            if fpr < p {
                return Ok((m, k));
            }
        }
        Err(no_solution())
    }

    /// Adds `key`, returning `true` iff any of its `k` bits transitioned,
    /// i.e. the key was definitely not present before.
    ///
    /// Thread-safe and lock-free; when two threads race to add the same
    /// novel key, at most one observes each bit transition, so duplicates
    /// can never be under-counted.
    pub fn add(&self, key: &[u8]) -> bool {
        let hash = DoubleHash::new(key);
        let mut added = false;
        for i in 0..self.k {
            added |= self.bits.set_if_unset(self.reduce(hash.index(i)));
        }
        added
    }

    /// True iff all `k` bits for `key` are set. Never `false` for an added
    /// key; spuriously `true` with probability about `p` at design load.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let hash = DoubleHash::new(key);
        (0..self.k).all(|i| self.bits.test(self.reduce(hash.index(i))))
    }

    /// Approximate number of distinct keys stored, from the fill fraction.
    ///
    /// Ref: Swamidass & Baldi (2007) <https://doi.org/10.1021/ci600358f>
    #[must_use]
    pub fn count_estimate(&self) -> u64 {
        let x = self.bits.popcount();
        if x == 0 {
            return 0;
        }
        let m = self.m as f64;
        (-(m / f64::from(self.k)) * (1.0 - x as f64 / m).ln()).round() as u64
    }

    /// The implied false positive probability of a probe at the current
    /// fill level.
    #[must_use]
    pub fn fpr_estimate(&self) -> f64 {
        (self.bits.popcount() as f64 / self.m as f64).powi(self.k as i32)
    }

    #[inline]
    fn reduce(&self, h: u64) -> u64 {
        match self.mask {
            Some(mask) => h & mask,
            None => h % self.m,
        }
    }

    /// Expected item count the filter was sized for.
    #[must_use]
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Target false positive rate the filter was sized for.
    #[must_use]
    pub fn p(&self) -> f64 {
        self.p
    }

    /// Bit array width.
    #[must_use]
    pub fn m(&self) -> u64 {
        self.m
    }

    /// Number of hash functions.
    #[must_use]
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Total set bits (snapshot).
    #[must_use]
    pub fn popcount(&self) -> u64 {
        self.bits.popcount()
    }
}

fn validate_targets(n: u64, p: f64) -> Result<()> {
    if n == 0 {
        return Err(FgmarkError::InvalidParameter {
            parameter: "n-items".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    if !(p > 0.0 && p < 1.0) {
        return Err(FgmarkError::InvalidParameter {
            parameter: "fp-rate".to_string(),
            reason: format!("must be in (0, 1), got {p}"),
        });
    }
    Ok(())
}
