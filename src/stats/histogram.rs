//! Log-linear latency histogram.
//!
//! Percentile estimator with bounded relative error and O(1) insertion.
//! Buckets are arranged in 19 groups of 64: the first two groups are exact
//! (values below 128µs index directly), and each later group covers one
//! power-of-two range sliced into 64 linear buckets. Discarding the bits
//! below the 6 index bits bounds the relative error at 1/2^7 ≈ 0.78%.
//!
//! Insertion of a sample `x`:
//! 1. Find `n`, the position of the most significant set bit.
//! 2. `n <= 6`: `x` indexes its bucket directly (exact).
//! 3. Otherwise the group is `n - 6 + 1` and the 6 bits below bit `n` pick
//!    the bucket inside it; lower bits are discarded. The bucket reports the
//!    midpoint of its range.
//! 4. Samples at or beyond 2^24 clamp into the last bucket.

/// Index bits per group.
pub const PLAT_BITS: u32 = 6;
/// Buckets per group.
pub const PLAT_VAL: usize = 1 << PLAT_BITS;
/// Number of groups.
pub const PLAT_GROUP_NR: usize = 19;
/// Total bucket count.
pub const PLAT_NR: usize = PLAT_GROUP_NR * PLAT_VAL;

#[derive(Clone)]
pub struct LatHistogram {
    buckets: Box<[u64; PLAT_NR]>,
    total: u64,
}

impl std::fmt::Debug for LatHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatHistogram")
            .field("total", &self.total)
            .finish()
    }
}

impl LatHistogram {
    pub fn new() -> Self {
        Self {
            buckets: Box::new([0; PLAT_NR]),
            total: 0,
        }
    }

    /// Bucket index for a sample value (µs).
    #[inline]
    pub fn index_of(value: u64) -> usize {
        let msb = if value == 0 {
            0
        } else {
            63 - value.leading_zeros()
        };

        // Below two full groups the value is its own index, no rounding.
        if msb <= PLAT_BITS {
            return value as usize;
        }

        let error_bits = msb - PLAT_BITS;
        let base = ((error_bits + 1) as usize) << PLAT_BITS;
        let offset = (PLAT_VAL - 1) & (value >> error_bits) as usize;
        (base + offset).min(PLAT_NR - 1)
    }

    /// Representative value (µs) of a bucket: exact for the first two
    /// groups, the midpoint of the bucket's range afterwards.
    #[inline]
    pub fn value_of(idx: usize) -> u64 {
        debug_assert!(idx < PLAT_NR);
        if idx < PLAT_VAL * 2 {
            return idx as u64;
        }
        let error_bits = (idx >> PLAT_BITS) as u32 - 1;
        let base = 1u64 << (error_bits + PLAT_BITS);
        let k = (idx % PLAT_VAL) as u64;
        base + k * (1 << error_bits) + (1 << error_bits) / 2
    }

    /// Group a bucket index belongs to.
    #[inline]
    pub fn group_of(idx: usize) -> usize {
        idx >> PLAT_BITS
    }

    #[inline(always)]
    pub fn record(&mut self, value_us: u64) {
        self.buckets[Self::index_of(value_us)] += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn bucket(&self, idx: usize) -> u64 {
        self.buckets[idx]
    }

    /// Value (µs) at percentile `p ∈ (0, 100]`.
    ///
    /// Walks buckets until the cumulative count reaches rank ⌈p·n/100⌉ and
    /// reports that bucket's representative value.
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.total == 0 || p <= 0.0 || p > 100.0 {
            return None;
        }
        let rank = ((p / 100.0 * self.total as f64).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (idx, &count) in self.buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= rank {
                return Some(Self::value_of(idx));
            }
        }
        None
    }

    /// Evaluate a whole percentile list in one bucket walk.
    pub fn percentiles(&self, list: &[f64]) -> Vec<(f64, u64)> {
        let mut sorted: Vec<f64> = list
            .iter()
            .copied()
            .filter(|p| *p > 0.0 && *p <= 100.0)
            .collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let mut out = Vec::with_capacity(sorted.len());
        if self.total == 0 {
            return out;
        }
        let mut cumulative = 0u64;
        let mut idx = 0usize;
        for p in sorted {
            let rank = ((p / 100.0 * self.total as f64).ceil() as u64).max(1);
            while idx < PLAT_NR && cumulative + self.buckets[idx] < rank {
                cumulative += self.buckets[idx];
                idx += 1;
            }
            if idx >= PLAT_NR {
                break;
            }
            out.push((p, Self::value_of(idx)));
        }
        out
    }

    pub fn merge(&mut self, other: &LatHistogram) {
        for (dst, src) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *dst += src;
        }
        self.total += other.total;
    }

    pub fn reset(&mut self) {
        self.buckets.fill(0);
        self.total = 0;
    }
}

impl Default for LatHistogram {
    fn default() -> Self {
        Self::new()
    }
}
