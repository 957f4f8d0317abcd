//! Workload definition enums and small types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of IO directions.
pub const DDIR_COUNT: usize = 3;

/// IO direction (ddir).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataDir {
    Read = 0,
    Write = 1,
    Trim = 2,
}

impl DataDir {
    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Directions that dirty the target and feed verification history.
    #[inline(always)]
    pub fn is_write(self) -> bool {
        matches!(self, DataDir::Write)
    }

    pub const ALL: [DataDir; DDIR_COUNT] = [DataDir::Read, DataDir::Write, DataDir::Trim];
}

impl fmt::Display for DataDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataDir::Read => write!(f, "read"),
            DataDir::Write => write!(f, "write"),
            DataDir::Trim => write!(f, "trim"),
        }
    }
}

/// Overall read/write shape of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RwMode {
    Read,
    Write,
    Trim,
    RandRead,
    RandWrite,
    RandTrim,
    #[serde(alias = "rw")]
    ReadWrite,
    RandRw,
}

impl RwMode {
    pub fn is_random(self) -> bool {
        matches!(
            self,
            RwMode::RandRead | RwMode::RandWrite | RwMode::RandTrim | RwMode::RandRw
        )
    }

    /// The single direction of a pure workload, `None` when mixed.
    pub fn fixed_dir(self) -> Option<DataDir> {
        match self {
            RwMode::Read | RwMode::RandRead => Some(DataDir::Read),
            RwMode::Write | RwMode::RandWrite => Some(DataDir::Write),
            RwMode::Trim | RwMode::RandTrim => Some(DataDir::Trim),
            RwMode::ReadWrite | RwMode::RandRw => None,
        }
    }

    pub fn has_writes(self) -> bool {
        !matches!(self, RwMode::Read | RwMode::RandRead)
    }
}

impl fmt::Display for RwMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RwMode::Read => "read",
            RwMode::Write => "write",
            RwMode::Trim => "trim",
            RwMode::RandRead => "randread",
            RwMode::RandWrite => "randwrite",
            RwMode::RandTrim => "randtrim",
            RwMode::ReadWrite => "readwrite",
            RwMode::RandRw => "randrw",
        };
        write!(f, "{}", name)
    }
}

/// How sequential offsets advance across directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeqMode {
    /// Each direction advances its own cursor.
    Sequential,
    /// Directions share one cursor, so read and write touch the same offsets.
    Identical,
}

impl Default for SeqMode {
    fn default() -> Self {
        Self::Sequential
    }
}

/// Block size specification for one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BsSpec {
    /// One constant size; never consults the PRNG.
    Fixed(u32),
    /// Uniform draw in `[min, max]`, aligned afterwards.
    Range { min: u32, max: u32 },
    /// Discrete `{bs, weight}` distribution, weights in percent.
    Split(Vec<BsSplitEntry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BsSplitEntry {
    pub bs: u32,
    pub weight: u32,
}

impl BsSpec {
    /// Smallest size this spec can produce.
    pub fn min_bs(&self) -> u32 {
        match self {
            BsSpec::Fixed(bs) => *bs,
            BsSpec::Range { min, .. } => *min,
            BsSpec::Split(entries) => entries.iter().map(|e| e.bs).min().unwrap_or(0),
        }
    }

    /// Largest size this spec can produce.
    pub fn max_bs(&self) -> u32 {
        match self {
            BsSpec::Fixed(bs) => *bs,
            BsSpec::Range { max, .. } => *max,
            BsSpec::Split(entries) => entries.iter().map(|e| e.bs).max().unwrap_or(0),
        }
    }
}

impl Default for BsSpec {
    fn default() -> Self {
        BsSpec::Fixed(4096)
    }
}

/// Verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    Off,
    /// Header-only CRC over the payload.
    Crc32,
    /// Header plus full byte-for-byte pattern compare.
    Pattern,
    /// Header, sequence number, and CRC.
    Meta,
}

impl Default for VerifyMode {
    fn default() -> Self {
        Self::Off
    }
}

/// Buffer allocation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemType {
    Heap,
    Shm,
    ShmHuge,
    Mmap,
    MmapHuge,
}

impl Default for MemType {
    fn default() -> Self {
        Self::Heap
    }
}

/// How the next file is chosen when a job drives several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileServiceType {
    RoundRobin,
    Random,
    Sequential,
}

impl Default for FileServiceType {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Preallocation policy applied when a file is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallocateMode {
    None,
    Posix,
    Keep,
}

impl Default for FallocateMode {
    fn default() -> Self {
        Self::Posix
    }
}

/// IO engine selector; engines are discovered by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sync,
    Mock,
    #[serde(rename = "io_uring")]
    IoUring,
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::Sync
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(EngineKind::Sync),
            "mock" => Ok(EngineKind::Mock),
            "io_uring" => Ok(EngineKind::IoUring),
            other => Err(format!("unknown engine '{}'", other)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Sync => write!(f, "sync"),
            EngineKind::Mock => write!(f, "mock"),
            EngineKind::IoUring => write!(f, "io_uring"),
        }
    }
}

/// Clock used for latency timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    Monotonic,
    /// CLOCK_MONOTONIC_COARSE: ~1ms resolution, cheaper per call.
    Coarse,
}

impl Default for ClockSource {
    fn default() -> Self {
        Self::Monotonic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rw_mode_classification() {
        assert!(RwMode::RandRw.is_random());
        assert!(!RwMode::ReadWrite.is_random());
        assert_eq!(RwMode::RandRead.fixed_dir(), Some(DataDir::Read));
        assert_eq!(RwMode::RandRw.fixed_dir(), None);
        assert!(RwMode::Trim.has_writes());
        assert!(!RwMode::Read.has_writes());
    }

    #[test]
    fn test_bs_spec_bounds() {
        let split = BsSpec::Split(vec![
            BsSplitEntry { bs: 4096, weight: 60 },
            BsSplitEntry { bs: 65536, weight: 40 },
        ]);
        assert_eq!(split.min_bs(), 4096);
        assert_eq!(split.max_bs(), 65536);
        assert_eq!(BsSpec::Fixed(512).min_bs(), 512);
    }

    #[test]
    fn test_engine_kind_by_name() {
        assert_eq!("sync".parse::<EngineKind>().unwrap(), EngineKind::Sync);
        assert_eq!("io_uring".parse::<EngineKind>().unwrap(), EngineKind::IoUring);
        assert!("aio".parse::<EngineKind>().is_err());
    }
}
