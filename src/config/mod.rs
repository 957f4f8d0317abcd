//! Job options.
//!
//! One [`Options`] value describes one job: what to run (workload shape),
//! how hard (concurrency, rate), against what (files), and what to measure
//! (timing/stats). Jobs deserialize from TOML job files; the CLI overrides
//! the common knobs on top. [`validator`] rejects inconsistent combinations
//! before any worker spawns.

pub mod validator;
pub mod workload;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use workload::*;

fn default_true() -> bool {
    true
}

fn default_size() -> u64 {
    0
}

fn default_iodepth() -> u32 {
    1
}

fn default_numjobs() -> u32 {
    1
}

fn default_nr_files() -> u32 {
    1
}

fn default_loops() -> u32 {
    1
}

fn default_rwmix_read() -> u32 {
    50
}

fn default_ratecycle() -> u64 {
    1000
}

fn default_verify_batch() -> u32 {
    1
}

fn default_mem_align() -> u32 {
    4096
}

fn default_bw_avg_time() -> u64 {
    500
}

fn default_percentile_list() -> Vec<f64> {
    vec![1.0, 5.0, 10.0, 20.0, 50.0, 90.0, 95.0, 99.0, 99.5, 99.9]
}

/// Workload shape: direction mix, sizes, region, phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadOpts {
    pub rw: RwMode,
    /// Engine, discovered by name.
    pub engine: EngineKind,
    /// Block size spec applied to every direction unless overridden.
    pub bs: BsSpec,
    pub bs_read: Option<BsSpec>,
    pub bs_write: Option<BsSpec>,
    pub bs_trim: Option<BsSpec>,
    /// Block alignment; defaults to the per-direction minimum size.
    pub ba: Option<u32>,
    pub bs_unaligned: bool,
    /// IO region bytes per file; 0 = whole file.
    pub size: u64,
    /// Region start within each file.
    pub offset: u64,
    pub zone_size: u64,
    pub zone_skip: u64,
    /// Passes over the workload.
    pub loops: u32,
    /// Keep going until `runtime` regardless of size.
    pub time_based: bool,
    /// Wall-clock budget in seconds; 0 = unlimited.
    pub runtime: u64,
    /// Warm-up seconds whose samples are discarded.
    pub ramp_time: u64,
    /// Percentage of mixed IOs that are reads.
    pub rwmix_read: u32,
    /// Percentage of IOs diverted to trim in mixed workloads.
    pub trim_percent: u32,
    /// Issues between re-rolls of the mix.
    pub rwmix_cycle: u32,
    pub seq_mode: SeqMode,
    /// Sequential issues between stride applications.
    pub ddir_seq_nr: u64,
    /// Stride added every `ddir_seq_nr` issues.
    pub ddir_seq_add: u64,
    /// Skip the no-repeat random map entirely.
    pub norandommap: bool,
    /// Map exhaustion is reported but not fatal.
    pub softrandommap: bool,
    /// Write until the device/file reports no space, then end cleanly.
    pub fill_device: bool,
    /// fsync after this many written blocks; 0 = never.
    pub fsync_blocks: u32,
    /// fdatasync after this many written blocks; 0 = never.
    pub fdatasync_blocks: u32,
    /// Full barrier (expressed as fsync) after this many written blocks.
    pub barrier_blocks: u32,
}

impl Default for WorkloadOpts {
    fn default() -> Self {
        Self {
            rw: RwMode::Read,
            engine: EngineKind::Sync,
            bs: BsSpec::default(),
            bs_read: None,
            bs_write: None,
            bs_trim: None,
            ba: None,
            bs_unaligned: false,
            size: default_size(),
            offset: 0,
            zone_size: 0,
            zone_skip: 0,
            loops: default_loops(),
            time_based: false,
            runtime: 0,
            ramp_time: 0,
            rwmix_read: default_rwmix_read(),
            trim_percent: 0,
            rwmix_cycle: 1,
            seq_mode: SeqMode::default(),
            ddir_seq_nr: 0,
            ddir_seq_add: 0,
            norandommap: false,
            softrandommap: false,
            fill_device: false,
            fsync_blocks: 0,
            fdatasync_blocks: 0,
            barrier_blocks: 0,
        }
    }
}

impl WorkloadOpts {
    /// Effective per-direction block size specs.
    pub fn bs_specs(&self) -> [BsSpec; DDIR_COUNT] {
        [
            self.bs_read.clone().unwrap_or_else(|| self.bs.clone()),
            self.bs_write.clone().unwrap_or_else(|| self.bs.clone()),
            self.bs_trim.clone().unwrap_or_else(|| self.bs.clone()),
        ]
    }

    /// Smallest block any direction can produce: random-map granularity.
    pub fn min_bs(&self) -> u32 {
        self.bs_specs().iter().map(|s| s.min_bs()).min().unwrap_or(0)
    }

    pub fn max_bs(&self) -> u32 {
        self.bs_specs().iter().map(|s| s.max_bs()).max().unwrap_or(0)
    }

    /// Per-direction alignment, defaulting to each spec's minimum.
    pub fn block_align(&self) -> [u32; DDIR_COUNT] {
        let specs = self.bs_specs();
        match self.ba {
            Some(ba) => [ba; DDIR_COUNT],
            None => [
                specs[0].min_bs(),
                specs[1].min_bs(),
                specs[2].min_bs(),
            ],
        }
    }

    /// Whether this workload keeps a no-repeat random map.
    pub fn wants_random_map(&self) -> bool {
        self.rw.is_random() && !self.norandommap && self.zone_size == 0
    }
}

/// Queue depth and job fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyOpts {
    pub iodepth: u32,
    /// Refill threshold: reap down to this depth before submitting again.
    pub iodepth_low: u32,
    /// Queued submissions per engine commit.
    pub iodepth_batch: u32,
    /// Completions reaped per getevents call; 0 = up to iodepth.
    pub iodepth_batch_complete: u32,
    pub numjobs: u32,
    /// Accepted for compatibility; workers are always threads here.
    pub use_thread: bool,
    pub cpumask: Option<u64>,
    pub nice: Option<i32>,
}

impl Default for ConcurrencyOpts {
    fn default() -> Self {
        Self {
            iodepth: default_iodepth(),
            iodepth_low: 0,
            iodepth_batch: 0,
            iodepth_batch_complete: 0,
            numjobs: default_numjobs(),
            use_thread: true,
            cpumask: None,
            nice: None,
        }
    }
}

impl ConcurrencyOpts {
    /// Batch size with the "0 = whole depth" default applied.
    pub fn batch(&self) -> u32 {
        if self.iodepth_batch == 0 {
            self.iodepth
        } else {
            self.iodepth_batch.min(self.iodepth)
        }
    }

    pub fn batch_complete(&self) -> u32 {
        if self.iodepth_batch_complete == 0 {
            self.iodepth
        } else {
            self.iodepth_batch_complete.min(self.iodepth)
        }
    }
}

/// Determinism controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandOpts {
    /// Identical seeds produce identical IO sequences across runs.
    pub rand_repeatable: bool,
    pub use_os_rand: bool,
    /// Job seed the eight per-worker streams derive from.
    pub rand_seed: u64,
    /// Explicit stream seeds, overriding derivation.
    pub rand_seeds: Option<[u64; 8]>,
}

impl Default for RandOpts {
    fn default() -> Self {
        Self {
            rand_repeatable: true,
            use_os_rand: false,
            rand_seed: 0x6a6f6221,
            rand_seeds: None,
        }
    }
}

/// Rate caps and floors, bytes/s and IOPS per direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateOpts {
    pub rate_read: u64,
    pub rate_write: u64,
    pub ratemin_read: u64,
    pub ratemin_write: u64,
    pub rate_iops_read: u64,
    pub rate_iops_write: u64,
    pub rate_iops_min_read: u64,
    pub rate_iops_min_write: u64,
    /// Sliding window (ms) for minimum-rate enforcement.
    pub ratecycle: u64,
    /// Rate becomes advisory: account, never sleep.
    pub no_stall: bool,
}

impl Default for RateOpts {
    fn default() -> Self {
        Self {
            rate_read: 0,
            rate_write: 0,
            ratemin_read: 0,
            ratemin_write: 0,
            rate_iops_read: 0,
            rate_iops_write: 0,
            rate_iops_min_read: 0,
            rate_iops_min_write: 0,
            ratecycle: default_ratecycle(),
            no_stall: false,
        }
    }
}

impl RateOpts {
    pub fn read_spec(&self) -> crate::rate::RateSpec {
        crate::rate::RateSpec {
            bytes: self.rate_read,
            iops: self.rate_iops_read,
            bytes_min: self.ratemin_read,
            iops_min: self.rate_iops_min_read,
        }
    }

    pub fn write_spec(&self) -> crate::rate::RateSpec {
        crate::rate::RateSpec {
            bytes: self.rate_write,
            iops: self.rate_iops_write,
            bytes_min: self.ratemin_write,
            iops_min: self.rate_iops_min_write,
        }
    }
}

/// Verification controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOpts {
    pub verify: VerifyMode,
    /// Chunk size; 0 = whole block.
    pub verify_interval: u32,
    /// Header placement within each chunk.
    pub verify_offset: u32,
    /// Hex pattern string ("0xdeadbeef"); seeded payload when absent.
    pub verify_pattern: Option<String>,
    pub verify_fatal: bool,
    pub verify_dump: bool,
    /// Offload threads; 0 = verify inline.
    pub verify_async: u32,
    /// Unverified writes allowed before submission stalls; 0 = unbounded.
    pub verify_backlog: u32,
    /// Entries drained per verifier wakeup.
    pub verify_batch: u32,
    /// Keep history sorted by offset even without overwrite.
    pub verify_sort: bool,
}

impl Default for VerifyOpts {
    fn default() -> Self {
        Self {
            verify: VerifyMode::Off,
            verify_interval: 0,
            verify_offset: 0,
            verify_pattern: None,
            verify_fatal: false,
            verify_dump: false,
            verify_async: 0,
            verify_backlog: 0,
            verify_batch: default_verify_batch(),
            verify_sort: false,
        }
    }
}

impl VerifyOpts {
    pub fn enabled(&self) -> bool {
        self.verify != VerifyMode::Off
    }

    /// Decode the `0x...` pattern string.
    pub fn pattern_bytes(&self) -> Result<Vec<u8>> {
        let Some(raw) = self.verify_pattern.as_deref() else {
            return Ok(Vec::new());
        };
        let hex = raw.strip_prefix("0x").unwrap_or(raw);
        if hex.is_empty() || hex.len() % 2 != 0 {
            return Err(Error::ConfigInvalid(format!(
                "verify_pattern '{}' is not an even-length hex string",
                raw
            )));
        }
        // Work on raw bytes: hex.len() counts bytes, so a multi-byte
        // character must fail as a bad digit, not split a str.
        let digit = |b: u8| {
            (b as char).to_digit(16).map(|d| d as u8).ok_or_else(|| {
                Error::ConfigInvalid(format!("verify_pattern '{}' has non-hex digits", raw))
            })
        };
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for pair in hex.as_bytes().chunks(2) {
            bytes.push((digit(pair[0])? << 4) | digit(pair[1])?);
        }
        Ok(bytes)
    }
}

/// File set and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOpts {
    /// Directory for generated file names.
    pub directory: Option<PathBuf>,
    /// Explicit file (or block device) path; generated names otherwise.
    pub filename: Option<PathBuf>,
    pub nr_files: u32,
    pub file_service_type: FileServiceType,
    /// Consecutive IOs per file before the service moves on.
    pub file_service_nr: u32,
    /// Randomize per-file size between these bounds when both set.
    pub file_size_low: Option<u64>,
    pub file_size_high: Option<u64>,
    pub create_serialize: bool,
    pub create_fsync: bool,
    /// Open files lazily on first access instead of at worker start.
    pub create_on_open: bool,
    pub pre_read: bool,
    /// Remove files at worker exit.
    pub unlink: bool,
    pub fallocate: FallocateMode,
    pub fsync_on_close: bool,
    pub end_fsync: bool,
    pub odirect: bool,
    pub sync_io: bool,
    /// Job overwrites its own data: verify history becomes offset-sorted.
    pub overwrite: bool,
}

impl Default for FileOpts {
    fn default() -> Self {
        Self {
            directory: None,
            filename: None,
            nr_files: default_nr_files(),
            file_service_type: FileServiceType::default(),
            file_service_nr: 1,
            file_size_low: None,
            file_size_high: None,
            create_serialize: false,
            create_fsync: false,
            create_on_open: false,
            pre_read: false,
            unlink: false,
            fallocate: FallocateMode::default(),
            fsync_on_close: false,
            end_fsync: false,
            odirect: false,
            sync_io: false,
            overwrite: false,
        }
    }
}

/// Buffer allocation and fill policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferOpts {
    pub mem_type: MemType,
    pub mem_align: u32,
    pub hugepage_size: u64,
    /// Write zeroes instead of random payloads.
    pub zero_buffers: bool,
    /// Refill the buffer before every write.
    pub refill_buffers: bool,
    /// Cheaply perturb a few words per write instead of a full refill.
    pub scramble_buffers: bool,
}

impl Default for BufferOpts {
    fn default() -> Self {
        Self {
            mem_type: MemType::default(),
            mem_align: default_mem_align(),
            hugepage_size: 0,
            zero_buffers: false,
            refill_buffers: false,
            scramble_buffers: true,
        }
    }
}

/// Measurement gates, percentiles, logs, clocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingOpts {
    pub disable_lat: bool,
    pub disable_clat: bool,
    pub disable_slat: bool,
    pub disable_bw: bool,
    /// One switch for all of the above plus depth maps.
    pub gtod_reduce: bool,
    /// Accepted and logged; timestamping stays in-worker.
    pub gtod_offload: bool,
    pub gtod_cpu: Option<u32>,
    pub clat_percentiles: bool,
    /// At most 20 entries in (0, 100].
    pub percentile_list: Vec<f64>,
    /// Bandwidth sample window (ms).
    pub bw_avg_time: u64,
    pub clocksource: ClockSource,
    /// CSV sample logs; written at exit when set.
    pub lat_log: Option<PathBuf>,
    pub bw_log: Option<PathBuf>,
    pub clat_log: Option<PathBuf>,
}

impl Default for TimingOpts {
    fn default() -> Self {
        Self {
            disable_lat: false,
            disable_clat: false,
            disable_slat: false,
            disable_bw: false,
            gtod_reduce: false,
            gtod_offload: false,
            gtod_cpu: None,
            clat_percentiles: default_true(),
            percentile_list: default_percentile_list(),
            bw_avg_time: default_bw_avg_time(),
            clocksource: ClockSource::default(),
            lat_log: None,
            bw_log: None,
            clat_log: None,
        }
    }
}

impl TimingOpts {
    pub fn clat_enabled(&self) -> bool {
        !(self.disable_clat || self.gtod_reduce)
    }

    pub fn slat_enabled(&self) -> bool {
        !(self.disable_slat || self.gtod_reduce)
    }

    pub fn lat_enabled(&self) -> bool {
        !(self.disable_lat || self.gtod_reduce)
    }

    pub fn bw_enabled(&self) -> bool {
        !(self.disable_bw || self.gtod_reduce)
    }

    pub fn depth_maps_enabled(&self) -> bool {
        !self.gtod_reduce
    }
}

/// Error policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorOpts {
    /// EIO/EILSEQ bump counters instead of ending the worker.
    pub continue_on_error: bool,
}

/// Everything one job needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Job name, used in reports and generated file names.
    pub name: String,
    pub workload: WorkloadOpts,
    pub concurrency: ConcurrencyOpts,
    pub rand: RandOpts,
    pub rate: RateOpts,
    pub verify: VerifyOpts,
    pub files: FileOpts,
    pub buffers: BufferOpts,
    pub timing: TimingOpts,
    pub errors: ErrorOpts,
}

impl Options {
    /// Parse a TOML job file.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::ConfigInvalid(format!("job file: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut opts = Self::from_toml(&text)?;
        if opts.name.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                opts.name = stem.to_string();
            }
        }
        Ok(opts)
    }

    /// Path of the n-th data file for this job.
    pub fn file_path(&self, file_index: usize) -> PathBuf {
        if let Some(filename) = &self.files.filename {
            return filename.clone();
        }
        let dir = self
            .files
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let name = if self.name.is_empty() { "job" } else { &self.name };
        dir.join(format!("{}.{}", name, file_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let opts = Options::default();
        assert_eq!(opts.concurrency.iodepth, 1);
        assert_eq!(opts.workload.loops, 1);
        assert!(opts.rand.rand_repeatable);
        assert!(opts.timing.clat_percentiles);
        assert_eq!(opts.workload.min_bs(), 4096);
    }

    #[test]
    fn test_toml_roundtrip() {
        let text = r#"
            name = "seqwrite"

            [workload]
            rw = "write"
            size = 1048576
            bs = { fixed = 4096 }

            [concurrency]
            iodepth = 4
            numjobs = 2

            [verify]
            verify = "pattern"
            verify_pattern = "0xdeadbeef"
        "#;
        let opts = Options::from_toml(text).unwrap();
        assert_eq!(opts.name, "seqwrite");
        assert_eq!(opts.workload.rw, RwMode::Write);
        assert_eq!(opts.workload.size, 1 << 20);
        assert_eq!(opts.concurrency.iodepth, 4);
        assert_eq!(opts.verify.verify, VerifyMode::Pattern);
        assert_eq!(
            opts.verify.pattern_bytes().unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let mut opts = Options::default();
        opts.verify.verify_pattern = Some("0xdea".into());
        assert!(opts.verify.pattern_bytes().is_err());
        opts.verify.verify_pattern = Some("0xzz".into());
        assert!(opts.verify.pattern_bytes().is_err());
        // Multi-byte characters pass the even-length check (4 UTF-8 bytes)
        // but must error, not panic.
        opts.verify.verify_pattern = Some("0xa€".into());
        assert!(opts.verify.pattern_bytes().is_err());
    }

    #[test]
    fn test_bs_overrides_per_direction() {
        let mut opts = Options::default();
        opts.workload.bs = BsSpec::Fixed(4096);
        opts.workload.bs_write = Some(BsSpec::Range {
            min: 8192,
            max: 65536,
        });
        let specs = opts.workload.bs_specs();
        assert_eq!(specs[DataDir::Read.index()], BsSpec::Fixed(4096));
        assert_eq!(specs[DataDir::Write.index()].max_bs(), 65536);
        assert_eq!(opts.workload.min_bs(), 4096);
        assert_eq!(opts.workload.max_bs(), 65536);
    }

    #[test]
    fn test_batch_defaults_to_depth() {
        let mut opts = Options::default();
        opts.concurrency.iodepth = 16;
        assert_eq!(opts.concurrency.batch(), 16);
        opts.concurrency.iodepth_batch = 4;
        assert_eq!(opts.concurrency.batch(), 4);
        opts.concurrency.iodepth_batch_complete = 32;
        assert_eq!(opts.concurrency.batch_complete(), 16);
    }

    #[test]
    fn test_file_paths() {
        let mut opts = Options::default();
        opts.name = "bench".into();
        opts.files.directory = Some(PathBuf::from("/tmp/t"));
        assert_eq!(opts.file_path(2), PathBuf::from("/tmp/t/bench.2"));
        opts.files.filename = Some(PathBuf::from("/dev/sdb"));
        assert_eq!(opts.file_path(0), PathBuf::from("/dev/sdb"));
    }

    #[test]
    fn test_wants_random_map() {
        let mut opts = Options::default();
        opts.workload.rw = RwMode::RandRead;
        assert!(opts.workload.wants_random_map());
        opts.workload.norandommap = true;
        assert!(!opts.workload.wants_random_map());
        opts.workload.norandommap = false;
        opts.workload.zone_size = 1 << 20;
        assert!(!opts.workload.wants_random_map());
    }
}
