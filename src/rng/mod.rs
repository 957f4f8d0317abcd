//! Seeded, restartable pseudo-random streams.
//!
//! Each worker owns eight independent streams, one per logical use, so that
//! drawing from one (say, block sizes) never perturbs another (say, offsets).
//! Every stream remembers its seed and can be restarted for looped phases.
//!
//! Two generator flavors exist behind one sum type, fixed at worker init:
//! a fast xoshiro256++ generator (the default) and a classic 64-bit LCG
//! matching the "OS rand" option. With `rand_repeatable`, stream seeds are
//! derived deterministically from the job seed and worker index.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Number of dedicated streams per worker.
pub const STREAM_COUNT: usize = 8;

/// Logical uses of the per-worker streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandStream {
    Offset = 0,
    BlockSize = 1,
    Verify = 2,
    Trim = 3,
    RwMix = 4,
    FileSize = 5,
    FileService = 6,
    BufFill = 7,
}

/// Classic 64-bit linear congruential generator (Knuth MMIX constants),
/// standing in for the libc generator behind `use_os_rand`.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    #[inline(always)]
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }
}

#[derive(Debug, Clone)]
enum RandState {
    Os(Lcg),
    Fast(Xoshiro256PlusPlus),
}

/// One seeded, restartable stream.
#[derive(Debug, Clone)]
pub struct RandSource {
    seed: u64,
    state: RandState,
}

impl RandSource {
    pub fn new(use_os_rand: bool, seed: u64) -> Self {
        let state = if use_os_rand {
            RandState::Os(Lcg::new(seed))
        } else {
            RandState::Fast(Xoshiro256PlusPlus::seed_from_u64(seed))
        };
        Self { seed, state }
    }

    /// Rewind to the initial state, as when a job loops over its phases.
    pub fn restart(&mut self) {
        *self = Self::new(matches!(self.state, RandState::Os(_)), self.seed);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform draw in `[0, bound)`. `bound == 0` yields 0.
    #[inline(always)]
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        // Multiply-shift keeps the draw unbiased enough for workload
        // generation without a rejection loop.
        ((self.next_u64() as u128 * bound as u128) >> 64) as u64
    }

    /// Draw a percentage in `[0, 100)`.
    #[inline(always)]
    pub fn next_percent(&mut self) -> u32 {
        self.next_below(100) as u32
    }
}

impl RngCore for RandSource {
    #[inline(always)]
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    #[inline(always)]
    fn next_u64(&mut self) -> u64 {
        match &mut self.state {
            RandState::Os(lcg) => lcg.next_u64(),
            RandState::Fast(rng) => rng.next_u64(),
        }
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut chunks = dest.chunks_exact_mut(8);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.next_u64().to_le_bytes());
        }
        let rem = chunks.into_remainder();
        if !rem.is_empty() {
            let bytes = self.next_u64().to_le_bytes();
            rem.copy_from_slice(&bytes[..rem.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// SplitMix64 step, used to spread one job seed across many stream seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// The eight per-worker stream seeds.
#[derive(Debug, Clone, Copy)]
pub struct SeedSet {
    seeds: [u64; STREAM_COUNT],
}

impl SeedSet {
    /// Deterministic derivation for `rand_repeatable`: the same job seed and
    /// worker index always produce the same eight stream seeds.
    pub fn repeatable(job_seed: u64, worker_index: u32) -> Self {
        let mut state = job_seed ^ ((worker_index as u64 + 1).wrapping_mul(0x9e3779b97f4a7c15));
        let mut seeds = [0u64; STREAM_COUNT];
        for seed in seeds.iter_mut() {
            *seed = splitmix64(&mut state);
        }
        Self { seeds }
    }

    pub fn from_entropy() -> Self {
        let mut seeds = [0u64; STREAM_COUNT];
        let mut rng = rand::rngs::OsRng;
        for seed in seeds.iter_mut() {
            *seed = rng.next_u64();
        }
        Self { seeds }
    }

    /// Explicit seeds, as given by the `rand_seeds` option.
    pub fn explicit(seeds: [u64; STREAM_COUNT]) -> Self {
        Self { seeds }
    }

    pub fn seed(&self, stream: RandStream) -> u64 {
        self.seeds[stream as usize]
    }

    pub fn source(&self, stream: RandStream, use_os_rand: bool) -> RandSource {
        RandSource::new(use_os_rand, self.seed(stream))
    }
}
