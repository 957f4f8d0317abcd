//! Latency timestamps via direct clock_gettime.
//!
//! Latency measurement happens twice per IO, so the clock is a direct
//! clock_gettime call rather than `std::time::Instant`. The coarse variant
//! trades ~1ms resolution for a cheaper call and backs the `coarse`
//! clocksource option.

use crate::config::workload::ClockSource;
use std::time::Duration;

/// Nanosecond monotonic timestamp.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FastInstant {
    nanos: u64,
}

impl FastInstant {
    #[inline(always)]
    fn read(clock: libc::clockid_t) -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(clock, &mut ts);
        }
        Self {
            nanos: (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64),
        }
    }

    #[inline(always)]
    pub fn now() -> Self {
        Self::read(libc::CLOCK_MONOTONIC)
    }

    /// ~1ms resolution, cheaper per call.
    #[inline(always)]
    pub fn now_coarse() -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::read(libc::CLOCK_MONOTONIC_COARSE)
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::read(libc::CLOCK_MONOTONIC)
        }
    }

    #[inline(always)]
    pub fn duration_since(&self, earlier: FastInstant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }

    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        Self::now().duration_since(*self)
    }
}

/// Clock handle bound to the configured source.
#[derive(Debug, Copy, Clone)]
pub struct Clock {
    source: ClockSource,
}

impl Clock {
    pub fn new(source: ClockSource) -> Self {
        Self { source }
    }

    #[inline(always)]
    pub fn now(&self) -> FastInstant {
        match self.source {
            ClockSource::Monotonic => FastInstant::now(),
            ClockSource::Coarse => FastInstant::now_coarse(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(ClockSource::Monotonic)
    }
}
