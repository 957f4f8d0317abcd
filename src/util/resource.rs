//! Per-worker process accounting via getrusage.
//!
//! Captured once when the measured phase starts and once at exit; the delta
//! lands in the final report next to the IO statistics.

/// Online CPU count, for worker fan-out sanity checks.
pub fn nr_cpus() -> usize {
    num_cpus::get()
}

/// Snapshot of thread resource usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcUsage {
    /// CPU time in user mode (µs).
    pub user_us: u64,
    /// CPU time in kernel mode (µs).
    pub system_us: u64,
    pub voluntary_ctx_switches: u64,
    pub involuntary_ctx_switches: u64,
    pub minor_faults: u64,
    pub major_faults: u64,
}

impl ProcUsage {
    /// Capture usage for the calling thread (whole process where the OS has
    /// no per-thread accounting).
    pub fn capture() -> Option<Self> {
        #[cfg(target_os = "linux")]
        let who = libc::RUSAGE_THREAD;
        #[cfg(not(target_os = "linux"))]
        let who = libc::RUSAGE_SELF;

        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::getrusage(who, &mut usage) };
        if rc != 0 {
            return None;
        }

        let tv_us = |tv: libc::timeval| (tv.tv_sec as u64) * 1_000_000 + tv.tv_usec as u64;
        Some(Self {
            user_us: tv_us(usage.ru_utime),
            system_us: tv_us(usage.ru_stime),
            voluntary_ctx_switches: usage.ru_nvcsw as u64,
            involuntary_ctx_switches: usage.ru_nivcsw as u64,
            minor_faults: usage.ru_minflt as u64,
            major_faults: usage.ru_majflt as u64,
        })
    }

    /// Usage accumulated since `earlier`.
    pub fn delta(&self, earlier: &ProcUsage) -> ProcUsage {
        ProcUsage {
            user_us: self.user_us.saturating_sub(earlier.user_us),
            system_us: self.system_us.saturating_sub(earlier.system_us),
            voluntary_ctx_switches: self
                .voluntary_ctx_switches
                .saturating_sub(earlier.voluntary_ctx_switches),
            involuntary_ctx_switches: self
                .involuntary_ctx_switches
                .saturating_sub(earlier.involuntary_ctx_switches),
            minor_faults: self.minor_faults.saturating_sub(earlier.minor_faults),
            major_faults: self.major_faults.saturating_sub(earlier.major_faults),
        }
    }
}
