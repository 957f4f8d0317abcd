//! Direction selection for mixed workloads.
//!
//! Pure jobs return their fixed direction without touching the PRNG. Mixed
//! jobs roll against the configured read percentage; `rwmix_cycle` throttles
//! how often that roll happens (the chosen direction is held in between).
//! Trims interleave with their own percentage, independent of the
//! read/write split.

use crate::config::workload::{DataDir, RwMode};
use crate::rng::RandSource;

#[derive(Debug, Clone)]
pub struct DirChooser {
    mode: RwMode,
    /// Percentage of mixed IOs that are reads.
    rwmix_read: u32,
    /// Percentage of all IOs diverted to trim.
    trim_percent: u32,
    /// Re-roll the read/write mix every this many issues.
    rwmix_cycle: u32,
    issues: u64,
    cur: DataDir,
}

impl DirChooser {
    pub fn new(mode: RwMode, rwmix_read: u32, trim_percent: u32, rwmix_cycle: u32) -> Self {
        Self {
            mode,
            rwmix_read,
            trim_percent,
            rwmix_cycle: rwmix_cycle.max(1),
            issues: 0,
            cur: mode.fixed_dir().unwrap_or(DataDir::Read),
        }
    }

    /// Direction of the next IO.
    ///
    /// `mix_rng` and `trim_rng` are the dedicated rwmix and trim streams.
    pub fn next(&mut self, mix_rng: &mut RandSource, trim_rng: &mut RandSource) -> DataDir {
        if let Some(dir) = self.mode.fixed_dir() {
            return dir;
        }

        if self.trim_percent > 0 && trim_rng.next_percent() < self.trim_percent {
            return DataDir::Trim;
        }

        if self.issues % self.rwmix_cycle as u64 == 0 {
            self.cur = if mix_rng.next_percent() < self.rwmix_read {
                DataDir::Read
            } else {
                DataDir::Write
            };
        }
        self.issues += 1;
        self.cur
    }

    pub fn issues(&self) -> u64 {
        self.issues
    }

    /// Rewind for a fresh loop pass.
    pub fn restart(&mut self) {
        self.issues = 0;
        self.cur = self.mode.fixed_dir().unwrap_or(DataDir::Read);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_modes_fixed() {
        let mut mix = RandSource::new(false, 1);
        let mut trim = RandSource::new(false, 2);
        let mut chooser = DirChooser::new(RwMode::Write, 50, 0, 1);
        for _ in 0..100 {
            assert_eq!(chooser.next(&mut mix, &mut trim), DataDir::Write);
        }
        let mut chooser = DirChooser::new(RwMode::RandTrim, 50, 0, 1);
        assert_eq!(chooser.next(&mut mix, &mut trim), DataDir::Trim);
    }

    #[test]
    fn test_mix_fraction_converges() {
        // rwmix 70/30 over 10k draws lands in [0.68, 0.72].
        let mut mix = RandSource::new(false, 42);
        let mut trim = RandSource::new(false, 43);
        let mut chooser = DirChooser::new(RwMode::RandRw, 70, 0, 1);

        let mut reads = 0u32;
        const N: u32 = 10_000;
        for _ in 0..N {
            if chooser.next(&mut mix, &mut trim) == DataDir::Read {
                reads += 1;
            }
        }
        let frac = reads as f64 / N as f64;
        assert!((0.68..=0.72).contains(&frac), "read fraction {}", frac);
    }

    #[test]
    fn test_rwmix_cycle_holds_direction() {
        let mut mix = RandSource::new(false, 7);
        let mut trim = RandSource::new(false, 8);
        let mut chooser = DirChooser::new(RwMode::ReadWrite, 50, 0, 16);

        let mut draws = Vec::new();
        for _ in 0..64 {
            draws.push(chooser.next(&mut mix, &mut trim));
        }
        // Within each 16-issue window the direction is constant.
        for window in draws.chunks(16) {
            assert!(window.iter().all(|d| *d == window[0]));
        }
    }

    #[test]
    fn test_trim_interleave() {
        let mut mix = RandSource::new(false, 3);
        let mut trim = RandSource::new(false, 4);
        let mut chooser = DirChooser::new(RwMode::RandRw, 100, 25, 1);

        let mut trims = 0u32;
        const N: u32 = 10_000;
        for _ in 0..N {
            if chooser.next(&mut mix, &mut trim) == DataDir::Trim {
                trims += 1;
            }
        }
        let frac = trims as f64 / N as f64;
        assert!((0.22..=0.28).contains(&frac), "trim fraction {}", frac);
    }
}
