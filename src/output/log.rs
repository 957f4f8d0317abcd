//! Per-sample CSV logs: latency, bandwidth, completion latency.
//!
//! One record per sample: `timestamp_ms, value, direction, block_size`,
//! directions encoded 0/1/2 for read/write/trim. Samples accumulate in
//! memory while the worker runs and flush to disk once at exit.

use crate::config::workload::DataDir;
use crate::error::Result;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub ms: u64,
    pub value: u64,
    pub dir: DataDir,
    pub bs: u32,
}

#[derive(Debug, Default)]
pub struct SampleLog {
    samples: Vec<Sample>,
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, ms: u64, value: u64, dir: DataDir, bs: u32) {
        self.samples.push(Sample { ms, value, dir, bs });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Write all samples as CSV records.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut out = std::io::BufWriter::new(file);
        for s in &self.samples {
            writeln!(out, "{}, {}, {}, {}", s.ms, s.value, s.dir.index(), s.bs)?;
        }
        out.flush()?;
        Ok(())
    }
}
