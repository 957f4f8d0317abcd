//! Worker statistics: running latency stats, histograms, depth maps, and
//! per-direction byte/block counters.
//!
//! Everything here is worker-private while a job runs; the supervisor reads
//! a worker's stats only after it has exited, and merges across workers for
//! the final report. Ramp expiry resets the lot so warm-up samples never
//! leak into results.

pub mod histogram;

use crate::config::workload::{DataDir, DDIR_COUNT};
use crate::util::resource::ProcUsage;
use histogram::LatHistogram;
use std::time::Duration;

/// Upper bounds (µs) of the linear microsecond latency buckets.
pub const LAT_US_LIMITS: [u64; 10] = [2, 4, 10, 20, 50, 100, 250, 500, 750, 1000];

/// Upper bounds (ms) of the linear millisecond latency buckets; the last
/// bucket is open-ended.
pub const LAT_MS_LIMITS: [u64; 12] = [
    2,
    4,
    10,
    20,
    50,
    100,
    250,
    500,
    750,
    1000,
    2000,
    u64::MAX,
];

/// Number of coarse depth bins: 1, 2, 4, 8, 16, 32, >=64.
pub const DEPTH_BINS: usize = 7;

/// Running `(min, max, sum, sum², n)` supporting O(1) mean and deviation.
#[derive(Debug, Clone)]
pub struct RunningStat {
    min: u64,
    max: u64,
    sum: u64,
    sum_sq: f64,
    n: u64,
}

impl RunningStat {
    pub fn new() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            sum: 0,
            sum_sq: 0.0,
            n: 0,
        }
    }

    #[inline(always)]
    pub fn record(&mut self, v: u64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
        self.sum_sq += (v as f64) * (v as f64);
        self.n += 1;
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn min(&self) -> Option<u64> {
        (self.n > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<u64> {
        (self.n > 0).then_some(self.max)
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum as f64 / self.n as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = (self.sum_sq - self.n as f64 * mean * mean) / (self.n - 1) as f64;
        var.max(0.0).sqrt()
    }

    pub fn merge(&mut self, other: &RunningStat) {
        if other.n == 0 {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.n += other.n;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for RunningStat {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse logarithmic depth map: observed depths bucketed into 7 bins.
#[derive(Debug, Clone, Default)]
pub struct DepthMap {
    bins: [u64; DEPTH_BINS],
}

impl DepthMap {
    #[inline]
    fn bin_of(depth: u64) -> usize {
        if depth <= 1 {
            return 0;
        }
        ((63 - depth.leading_zeros()) as usize).min(DEPTH_BINS - 1)
    }

    #[inline(always)]
    pub fn record(&mut self, depth: u64) {
        self.bins[Self::bin_of(depth)] += 1;
    }

    pub fn bins(&self) -> &[u64; DEPTH_BINS] {
        &self.bins
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }

    pub fn merge(&mut self, other: &DepthMap) {
        for (dst, src) in self.bins.iter_mut().zip(other.bins.iter()) {
            *dst += src;
        }
    }

    pub fn reset(&mut self) {
        self.bins = [0; DEPTH_BINS];
    }
}

/// Per-direction IO accounting.
#[derive(Debug, Clone, Default)]
pub struct DirStats {
    /// Completed payload bytes; monotonic, Σ length over completions.
    pub io_bytes: u64,
    /// Completed IO count.
    pub io_blocks: u64,
    /// Submission latency (µs): unit allocation to engine acceptance.
    pub slat: RunningStat,
    /// Completion latency (µs): submission to completion.
    pub clat: RunningStat,
    /// Total latency (µs): slat + clat.
    pub lat: RunningStat,
    /// Log-linear percentile estimator over completion latency.
    pub clat_hist: LatHistogram,
}

impl DirStats {
    fn merge(&mut self, other: &DirStats) {
        self.io_bytes += other.io_bytes;
        self.io_blocks += other.io_blocks;
        self.slat.merge(&other.slat);
        self.clat.merge(&other.clat);
        self.lat.merge(&other.lat);
        self.clat_hist.merge(&other.clat_hist);
    }

    fn reset(&mut self) {
        *self = DirStats::default();
    }
}

/// Full statistics aggregate for one worker (or, after merging, one job).
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    dirs: [DirStats; DDIR_COUNT],
    submit_depth: DepthMap,
    complete_depth: DepthMap,
    queue_depth: DepthMap,
    lat_us: [u64; 10],
    lat_ms: [u64; 12],
    total_err_count: u64,
    usage_start: Option<ProcUsage>,
    usage_end: Option<ProcUsage>,
    runtime: Duration,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(&self, dir: DataDir) -> &DirStats {
        &self.dirs[dir.index()]
    }

    /// Account a completed IO: byte/block counters plus the latency
    /// triple. Latency arguments are `None` when the corresponding
    /// collection is disabled; `lat_us` is slat + clat, gated separately
    /// so `disable_lat` works independently.
    pub fn record_completion(
        &mut self,
        dir: DataDir,
        bytes: usize,
        slat_us: Option<u64>,
        clat_us: Option<u64>,
        lat_us: Option<u64>,
    ) {
        let idx = dir.index();
        {
            let d = &mut self.dirs[idx];
            d.io_bytes += bytes as u64;
            d.io_blocks += 1;

            if let Some(slat) = slat_us {
                d.slat.record(slat);
            }
            if let Some(clat) = clat_us {
                d.clat.record(clat);
                d.clat_hist.record(clat);
            }
            if let Some(lat) = lat_us {
                d.lat.record(lat);
            }
        }
        if let Some(clat) = clat_us {
            self.record_linear(clat);
        }
    }

    fn record_linear(&mut self, clat_us: u64) {
        if clat_us < 1000 {
            for (i, limit) in LAT_US_LIMITS.iter().enumerate() {
                if clat_us <= *limit {
                    self.lat_us[i] += 1;
                    return;
                }
            }
            self.lat_us[LAT_US_LIMITS.len() - 1] += 1;
        } else {
            let ms = clat_us / 1000;
            for (i, limit) in LAT_MS_LIMITS.iter().enumerate() {
                if ms <= *limit {
                    self.lat_ms[i] += 1;
                    return;
                }
            }
        }
    }

    pub fn record_submit_depth(&mut self, depth: u64) {
        self.submit_depth.record(depth);
    }

    pub fn record_complete_depth(&mut self, depth: u64) {
        self.complete_depth.record(depth);
    }

    pub fn record_queue_depth(&mut self, depth: u64) {
        self.queue_depth.record(depth);
    }

    pub fn bump_errors(&mut self) {
        self.total_err_count += 1;
    }

    pub fn total_err_count(&self) -> u64 {
        self.total_err_count
    }

    pub fn mark_start(&mut self) {
        self.usage_start = ProcUsage::capture();
    }

    pub fn mark_end(&mut self, runtime: Duration) {
        self.usage_end = ProcUsage::capture();
        self.runtime = runtime;
    }

    pub fn runtime(&self) -> Duration {
        self.runtime
    }

    pub fn set_runtime(&mut self, runtime: Duration) {
        self.runtime = runtime;
    }

    /// Process accounting delta over the measured interval.
    pub fn usage_delta(&self) -> Option<ProcUsage> {
        match (&self.usage_start, &self.usage_end) {
            (Some(start), Some(end)) => Some(end.delta(start)),
            _ => None,
        }
    }

    pub fn submit_depth(&self) -> &DepthMap {
        &self.submit_depth
    }

    pub fn complete_depth(&self) -> &DepthMap {
        &self.complete_depth
    }

    pub fn queue_depth(&self) -> &DepthMap {
        &self.queue_depth
    }

    pub fn lat_us_buckets(&self) -> &[u64; 10] {
        &self.lat_us
    }

    pub fn lat_ms_buckets(&self) -> &[u64; 12] {
        &self.lat_ms
    }

    /// Bandwidth in bytes/s for one direction over the measured runtime.
    pub fn bandwidth(&self, dir: DataDir) -> f64 {
        let secs = self.runtime.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.dir(dir).io_bytes as f64 / secs
    }

    /// IOPS for one direction over the measured runtime.
    pub fn iops(&self, dir: DataDir) -> f64 {
        let secs = self.runtime.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.dir(dir).io_blocks as f64 / secs
    }

    /// Fold another worker's stats into this aggregate.
    pub fn merge(&mut self, other: &WorkerStats) {
        for (dst, src) in self.dirs.iter_mut().zip(other.dirs.iter()) {
            dst.merge(src);
        }
        self.submit_depth.merge(&other.submit_depth);
        self.complete_depth.merge(&other.complete_depth);
        self.queue_depth.merge(&other.queue_depth);
        for (dst, src) in self.lat_us.iter_mut().zip(other.lat_us.iter()) {
            *dst += src;
        }
        for (dst, src) in self.lat_ms.iter_mut().zip(other.lat_ms.iter()) {
            *dst += src;
        }
        self.total_err_count += other.total_err_count;
        self.runtime = self.runtime.max(other.runtime);
    }

    /// Drop every sample, as when ramp expires and the measured phase
    /// starts. Process accounting restarts with the reset.
    pub fn reset(&mut self) {
        for d in self.dirs.iter_mut() {
            d.reset();
        }
        self.submit_depth.reset();
        self.complete_depth.reset();
        self.queue_depth.reset();
        self.lat_us = [0; 10];
        self.lat_ms = [0; 12];
        self.total_err_count = 0;
        self.runtime = Duration::ZERO;
        self.mark_start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat_basics() {
        let mut s = RunningStat::new();
        for v in [10u64, 20, 30] {
            s.record(v);
        }
        assert_eq!(s.min(), Some(10));
        assert_eq!(s.max(), Some(30));
        assert_eq!(s.n(), 3);
        assert!((s.mean() - 20.0).abs() < 1e-9);
        assert!((s.stddev() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_stat_empty() {
        let s = RunningStat::new();
        assert_eq!(s.min(), None);
        assert_eq!(s.mean(), 0.0);
        assert_eq!(s.stddev(), 0.0);
    }

    #[test]
    fn test_depth_map_bins() {
        let mut m = DepthMap::default();
        for d in [1u64, 2, 3, 4, 7, 8, 16, 32, 64, 1000] {
            m.record(d);
        }
        // 1 -> bin0; 2,3 -> bin1; 4..7 -> bin2; 8 -> bin3; 16 -> bin4;
        // 32 -> bin5; 64 and up -> bin6.
        assert_eq!(m.bins(), &[1, 2, 2, 1, 1, 1, 2]);
    }

    #[test]
    fn test_histogram_count_matches_stat_n() {
        let mut stats = WorkerStats::new();
        for i in 0..100u64 {
            stats.record_completion(DataDir::Read, 4096, Some(1), Some(i * 10), Some(1 + i * 10));
        }
        let read = stats.dir(DataDir::Read);
        assert_eq!(read.clat_hist.total(), read.clat.n());
        assert_eq!(read.io_blocks, 100);
        assert_eq!(read.io_bytes, 100 * 4096);
    }

    #[test]
    fn test_linear_bucket_routing() {
        let mut stats = WorkerStats::new();
        // 1µs -> first us bucket; 999µs -> last us bucket; 1500µs -> 2ms bucket.
        stats.record_completion(DataDir::Write, 1, None, Some(1), None);
        stats.record_completion(DataDir::Write, 1, None, Some(999), None);
        stats.record_completion(DataDir::Write, 1, None, Some(1500), None);
        assert_eq!(stats.lat_us_buckets()[0], 1);
        assert_eq!(stats.lat_us_buckets()[9], 1);
        assert_eq!(stats.lat_ms_buckets()[0], 1);
    }

    #[test]
    fn test_disabled_latency_still_counts_bytes() {
        let mut stats = WorkerStats::new();
        stats.record_completion(DataDir::Write, 8192, None, None, None);
        let w = stats.dir(DataDir::Write);
        assert_eq!(w.io_bytes, 8192);
        assert_eq!(w.clat.n(), 0);
        assert!(w.clat_hist.is_empty());
    }

    #[test]
    fn test_merge_and_rates() {
        let mut a = WorkerStats::new();
        let mut b = WorkerStats::new();
        a.record_completion(DataDir::Read, 4096, Some(1), Some(10), Some(11));
        b.record_completion(DataDir::Read, 4096, Some(2), Some(20), Some(22));
        a.set_runtime(Duration::from_secs(1));
        b.set_runtime(Duration::from_secs(1));
        a.merge(&b);

        assert_eq!(a.dir(DataDir::Read).io_bytes, 8192);
        assert_eq!(a.dir(DataDir::Read).clat.n(), 2);
        assert!((a.bandwidth(DataDir::Read) - 8192.0).abs() < 1e-9);
        assert!((a.iops(DataDir::Read) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut stats = WorkerStats::new();
        stats.record_completion(DataDir::Write, 4096, Some(5), Some(50), Some(55));
        stats.record_queue_depth(4);
        stats.bump_errors();
        stats.reset();

        assert_eq!(stats.dir(DataDir::Write).io_bytes, 0);
        assert_eq!(stats.queue_depth().total(), 0);
        assert_eq!(stats.total_err_count(), 0);
        assert!(stats.dir(DataDir::Write).clat_hist.is_empty());
    }
}
