//! Option validation.
//!
//! Runs once before any worker spawns. Everything rejected here surfaces as
//! `ConfigInvalid` and exit code 2; warnings go to the log and the job
//! proceeds.

use super::workload::*;
use super::Options;
use crate::error::{Error, Result};
use crate::verify::PATTERN_MAX;

fn fail(msg: impl Into<String>) -> Error {
    Error::ConfigInvalid(msg.into())
}

/// Validate a job's options. Returns the decoded verify pattern as a side
/// product so callers do not parse it twice.
pub fn validate(opts: &Options) -> Result<()> {
    let w = &opts.workload;
    let c = &opts.concurrency;
    let f = &opts.files;
    let v = &opts.verify;
    let t = &opts.timing;

    if c.numjobs == 0 {
        return Err(fail("numjobs must be at least 1"));
    }
    let cpus = crate::util::resource::nr_cpus();
    if c.numjobs as usize > cpus {
        log::warn!("numjobs {} exceeds {} online CPUs", c.numjobs, cpus);
    }
    if c.iodepth == 0 {
        return Err(fail("iodepth must be at least 1"));
    }
    if c.iodepth_low > c.iodepth {
        return Err(fail(format!(
            "iodepth_low {} exceeds iodepth {}",
            c.iodepth_low, c.iodepth
        )));
    }
    if f.nr_files == 0 {
        return Err(fail("nr_files must be at least 1"));
    }

    let specs = w.bs_specs();
    for (dir, spec) in DataDir::ALL.iter().zip(specs.iter()) {
        match spec {
            BsSpec::Fixed(bs) => {
                if *bs == 0 {
                    return Err(fail(format!("{} block size must be non-zero", dir)));
                }
            }
            BsSpec::Range { min, max } => {
                if *min == 0 || min > max {
                    return Err(fail(format!(
                        "{} block size range [{}, {}] is invalid",
                        dir, min, max
                    )));
                }
            }
            BsSpec::Split(entries) => {
                if entries.is_empty() {
                    return Err(fail(format!("{} bssplit has no entries", dir)));
                }
                if entries.iter().any(|e| e.bs == 0) {
                    return Err(fail(format!("{} bssplit has a zero block size", dir)));
                }
                let total: u64 = entries.iter().map(|e| e.weight as u64).sum();
                if total == 0 {
                    return Err(fail(format!("{} bssplit weights sum to zero", dir)));
                }
                if total != 100 {
                    log::warn!("{} bssplit weights sum to {}, normalizing", dir, total);
                }
            }
        }
    }

    if w.size > 0 && (w.max_bs() as u64) > w.size {
        return Err(fail(format!(
            "block size {} exceeds io size {}",
            w.max_bs(),
            w.size
        )));
    }
    if w.size == 0 && f.filename.is_none() && !w.fill_device {
        return Err(fail(
            "size must be set when files are generated (or use fill_device)",
        ));
    }
    if w.zone_skip > 0 && w.zone_size == 0 {
        return Err(fail("zone_skip requires zone_size"));
    }
    if w.rwmix_read > 100 {
        return Err(fail("rwmix_read is a percentage"));
    }
    if w.trim_percent > 100 {
        return Err(fail("trim_percent is a percentage"));
    }
    if w.loops == 0 {
        return Err(fail("loops must be at least 1"));
    }
    if w.time_based && w.runtime == 0 {
        return Err(fail("time_based requires runtime"));
    }

    if let Some((low, high)) = f.file_size_low.zip(f.file_size_high) {
        if low == 0 || low > high {
            return Err(fail(format!(
                "file size range [{}, {}] is invalid",
                low, high
            )));
        }
    }

    let r = &opts.rate;
    if (r.ratemin_read > 0 && r.rate_read > 0 && r.ratemin_read > r.rate_read)
        || (r.ratemin_write > 0 && r.rate_write > 0 && r.ratemin_write > r.rate_write)
    {
        return Err(fail("ratemin exceeds the rate cap"));
    }
    if (r.rate_iops_min_read > 0 && r.rate_iops_read > 0 && r.rate_iops_min_read > r.rate_iops_read)
        || (r.rate_iops_min_write > 0
            && r.rate_iops_write > 0
            && r.rate_iops_min_write > r.rate_iops_write)
    {
        return Err(fail("rate_iops_min exceeds the rate_iops cap"));
    }

    if v.enabled() {
        if !w.rw.has_writes() {
            return Err(fail("verify requires a workload that writes"));
        }
        let pattern = v.pattern_bytes()?;
        if pattern.len() > PATTERN_MAX {
            return Err(fail(format!(
                "verify_pattern is {} bytes, limit {}",
                pattern.len(),
                PATTERN_MAX
            )));
        }
        if v.verify_interval > 0 && v.verify_interval as u64 > w.max_bs() as u64 {
            return Err(fail("verify_interval exceeds the largest block size"));
        }
        if v.verify_offset > 0
            && (v.verify_offset as usize + crate::verify::HEADER_SIZE) as u64
                > w.min_bs() as u64
        {
            return Err(fail(
                "verify_offset leaves no room for the header in the smallest block",
            ));
        }
        if v.verify_backlog > 0 && v.verify_batch > v.verify_backlog {
            return Err(fail("verify_batch exceeds verify_backlog"));
        }
    }

    if t.percentile_list.len() > 20 {
        return Err(fail("percentile_list holds at most 20 entries"));
    }
    for p in &t.percentile_list {
        if !(*p > 0.0 && *p <= 100.0) {
            return Err(fail(format!("percentile {} outside (0, 100]", p)));
        }
    }

    if !opts.buffers.mem_align.is_power_of_two() {
        return Err(fail("mem_align must be a power of two"));
    }

    // Advisory knobs: accepted, logged, no effect on the core.
    if t.gtod_offload || t.gtod_cpu.is_some() {
        log::warn!("gtod_offload/gtod_cpu are advisory; timestamps stay in-worker");
    }
    if !c.use_thread {
        log::warn!("use_thread=false requested; workers run as threads regardless");
    }
    if w.engine == EngineKind::Sync && c.iodepth > 1 {
        log::warn!(
            "sync engine completes inline; iodepth {} acts as 1",
            c.iodepth
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;

    fn base() -> Options {
        let mut opts = Options::default();
        opts.name = "t".into();
        opts.workload.size = 1 << 20;
        opts
    }

    #[test]
    fn test_defaults_validate() {
        validate(&base()).unwrap();
    }

    #[test]
    fn test_zero_iodepth_rejected() {
        let mut opts = base();
        opts.concurrency.iodepth = 0;
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn test_bs_larger_than_size_rejected() {
        let mut opts = base();
        opts.workload.size = 1024;
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn test_zone_skip_without_zone_size_rejected() {
        let mut opts = base();
        opts.workload.zone_skip = 4096;
        assert!(validate(&opts).is_err());
        opts.workload.zone_size = 65536;
        validate(&opts).unwrap();
    }

    #[test]
    fn test_verify_requires_writes() {
        let mut opts = base();
        opts.verify.verify = VerifyMode::Crc32;
        opts.workload.rw = RwMode::Read;
        assert!(validate(&opts).is_err());
        opts.workload.rw = RwMode::Write;
        validate(&opts).unwrap();
    }

    #[test]
    fn test_long_pattern_rejected() {
        let mut opts = base();
        opts.workload.rw = RwMode::Write;
        opts.verify.verify = VerifyMode::Pattern;
        opts.verify.verify_pattern = Some(format!("0x{}", "ab".repeat(513)));
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn test_percentile_list_bounds() {
        let mut opts = base();
        opts.timing.percentile_list = vec![0.0];
        assert!(validate(&opts).is_err());
        opts.timing.percentile_list = vec![50.0; 21];
        assert!(validate(&opts).is_err());
        opts.timing.percentile_list = vec![50.0, 99.0];
        validate(&opts).unwrap();
    }

    #[test]
    fn test_ratemin_above_cap_rejected() {
        let mut opts = base();
        opts.rate.rate_write = 1024;
        opts.rate.ratemin_write = 4096;
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn test_verify_batch_vs_backlog() {
        let mut opts = base();
        opts.workload.rw = RwMode::Write;
        opts.verify.verify = VerifyMode::Crc32;
        opts.verify.verify_backlog = 4;
        opts.verify.verify_batch = 8;
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn test_mem_align_power_of_two() {
        let mut opts = base();
        opts.buffers.mem_align = 3000;
        assert!(validate(&opts).is_err());
    }
}
