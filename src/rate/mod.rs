//! Per-direction rate pacing and minimum-rate enforcement.
//!
//! Two caps are tracked simultaneously per direction: bytes/s and IOPS/s.
//! After each completed IO the limiter computes the ideal elapsed time for
//! the work done so far under both caps (when both are set, the stricter
//! one wins) and accumulates the shortfall as pending sleep, flushed only
//! once it exceeds a threshold to amortize call overhead. Minimum rates are
//! evaluated over sliding windows of `ratecycle` milliseconds; a full
//! window below the floor fails the worker with `RateTooLow`.
//!
//! The limiter is clock-agnostic: callers pass the elapsed time since the
//! phase started, which keeps pacing testable without real sleeps.

use crate::config::workload::DataDir;
use crate::error::{Error, Result};
use std::time::Duration;

/// Pending sleep below this threshold is deferred, not flushed.
const MIN_SLEEP: Duration = Duration::from_micros(100);

/// Rate caps are tracked for read and write; trim is accounted with write.
const RATE_DIRS: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct RateSpec {
    /// Bytes/s cap, 0 = uncapped.
    pub bytes: u64,
    /// IOPS cap, 0 = uncapped.
    pub iops: u64,
    /// Bytes/s floor, 0 = unenforced.
    pub bytes_min: u64,
    /// IOPS floor, 0 = unenforced.
    pub iops_min: u64,
}

impl RateSpec {
    fn is_capped(&self) -> bool {
        self.bytes > 0 || self.iops > 0
    }

    fn has_floor(&self) -> bool {
        self.bytes_min > 0 || self.iops_min > 0
    }
}

#[derive(Debug, Clone, Default)]
struct DirState {
    bytes: u64,
    ios: u64,
    win_start: Duration,
    win_bytes: u64,
    win_ios: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    specs: [RateSpec; RATE_DIRS],
    state: [DirState; RATE_DIRS],
    ratecycle: Duration,
    no_stall: bool,
}

impl RateLimiter {
    pub fn new(read: RateSpec, write: RateSpec, ratecycle_ms: u64, no_stall: bool) -> Self {
        Self {
            specs: [read, write],
            state: Default::default(),
            ratecycle: Duration::from_millis(ratecycle_ms.max(1)),
            no_stall,
        }
    }

    /// An inactive limiter never sleeps and never fails.
    pub fn is_active(&self) -> bool {
        self.specs.iter().any(|s| s.is_capped() || s.has_floor())
    }

    #[inline]
    fn slot(dir: DataDir) -> usize {
        match dir {
            DataDir::Read => 0,
            DataDir::Write | DataDir::Trim => 1,
        }
    }

    /// Account a completed IO and return how long the caller should sleep
    /// before the next submission, if at all.
    ///
    /// `elapsed` is the time since the phase (and this limiter) started.
    /// Returns `RateTooLow` if a full `ratecycle` window ran below a floor.
    pub fn on_complete(
        &mut self,
        dir: DataDir,
        bytes: usize,
        elapsed: Duration,
    ) -> Result<Option<Duration>> {
        let slot = Self::slot(dir);
        let spec = self.specs[slot];
        let state = &mut self.state[slot];

        state.bytes += bytes as u64;
        state.ios += 1;
        state.win_bytes += bytes as u64;
        state.win_ios += 1;

        if spec.has_floor() {
            let win_elapsed = elapsed.saturating_sub(state.win_start);
            if win_elapsed >= self.ratecycle {
                let win_secs = win_elapsed.as_secs_f64();
                let measured_bytes = (state.win_bytes as f64 / win_secs) as u64;
                let measured_ios = (state.win_ios as f64 / win_secs) as u64;
                if spec.bytes_min > 0 && measured_bytes < spec.bytes_min {
                    return Err(Error::RateTooLow {
                        dir: if slot == 0 { "read" } else { "write" },
                        measured: measured_bytes,
                        floor: spec.bytes_min,
                    });
                }
                if spec.iops_min > 0 && measured_ios < spec.iops_min {
                    return Err(Error::RateTooLow {
                        dir: if slot == 0 { "read" } else { "write" },
                        measured: measured_ios,
                        floor: spec.iops_min,
                    });
                }
                state.win_start = elapsed;
                state.win_bytes = 0;
                state.win_ios = 0;
            }
        }

        if !spec.is_capped() || self.no_stall {
            return Ok(None);
        }

        // Ideal elapsed time for the work done so far; with both caps set
        // the stricter (longer) one wins.
        let mut ideal = Duration::ZERO;
        if spec.bytes > 0 {
            ideal = ideal.max(Duration::from_nanos(
                (state.bytes as u128 * 1_000_000_000 / spec.bytes as u128) as u64,
            ));
        }
        if spec.iops > 0 {
            ideal = ideal.max(Duration::from_nanos(
                (state.ios as u128 * 1_000_000_000 / spec.iops as u128) as u64,
            ));
        }

        let pending = ideal.saturating_sub(elapsed);
        if pending >= MIN_SLEEP {
            Ok(Some(pending))
        } else {
            Ok(None)
        }
    }

    /// Discard all pacing state, as when ramp ends and stats restart.
    pub fn reset(&mut self) {
        self.state = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_cap(bytes: u64) -> RateLimiter {
        RateLimiter::new(
            RateSpec::default(),
            RateSpec {
                bytes,
                ..Default::default()
            },
            1000,
            false,
        )
    }

    #[test]
    fn test_inactive_limiter_never_sleeps() {
        let mut rl = RateLimiter::new(RateSpec::default(), RateSpec::default(), 1000, false);
        assert!(!rl.is_active());
        let action = rl
            .on_complete(DataDir::Write, 1 << 20, Duration::from_micros(1))
            .unwrap();
        assert_eq!(action, None);
    }

    #[test]
    fn test_bytes_cap_requests_sleep() {
        // 1 MiB/s cap; 256 KiB done in 10ms wants ~240ms more.
        let mut rl = bytes_cap(1 << 20);
        let action = rl
            .on_complete(DataDir::Write, 256 * 1024, Duration::from_millis(10))
            .unwrap()
            .expect("should sleep");
        let ideal = Duration::from_nanos(256 * 1024 * 1_000_000_000 / (1 << 20));
        assert_eq!(action, ideal - Duration::from_millis(10));
    }

    #[test]
    fn test_on_pace_no_sleep() {
        let mut rl = bytes_cap(1 << 20);
        // 4 KiB at 1 MiB/s is ~3.9ms of ideal time; being at 5ms means ahead.
        let action = rl
            .on_complete(DataDir::Write, 4096, Duration::from_millis(5))
            .unwrap();
        assert_eq!(action, None);
    }

    #[test]
    fn test_small_shortfall_deferred() {
        let mut rl = bytes_cap(1 << 20);
        // Ideal ~3.906ms; at 3.9ms the 6µs shortfall stays pending.
        let action = rl
            .on_complete(DataDir::Write, 4096, Duration::from_micros(3900))
            .unwrap();
        assert_eq!(action, None);
    }

    #[test]
    fn test_iops_cap() {
        let mut rl = RateLimiter::new(
            RateSpec {
                iops: 100,
                ..Default::default()
            },
            RateSpec::default(),
            1000,
            false,
        );
        // 10 IOs at 100 IOPS should take 100ms; at 10ms we owe 90ms.
        let mut action = None;
        for i in 0..10 {
            action = rl
                .on_complete(DataDir::Read, 4096, Duration::from_millis(i))
                .unwrap();
        }
        assert_eq!(action, Some(Duration::from_millis(91)));
    }

    #[test]
    fn test_intersection_of_caps() {
        // Generous byte cap, tight IOPS cap: IOPS wins.
        let mut rl = RateLimiter::new(
            RateSpec::default(),
            RateSpec {
                bytes: 1 << 30,
                iops: 10,
                ..Default::default()
            },
            1000,
            false,
        );
        let action = rl
            .on_complete(DataDir::Write, 4096, Duration::from_millis(1))
            .unwrap()
            .expect("iops cap should stall");
        assert_eq!(action, Duration::from_millis(99));
    }

    #[test]
    fn test_no_stall_is_advisory() {
        let mut rl = RateLimiter::new(
            RateSpec::default(),
            RateSpec {
                bytes: 1024,
                ..Default::default()
            },
            1000,
            true,
        );
        let action = rl
            .on_complete(DataDir::Write, 1 << 20, Duration::from_millis(1))
            .unwrap();
        assert_eq!(action, None);
    }

    #[test]
    fn test_min_rate_window_failure() {
        let mut rl = RateLimiter::new(
            RateSpec::default(),
            RateSpec {
                bytes_min: 1 << 20,
                ..Default::default()
            },
            250,
            false,
        );
        // 4 KiB over a full 250ms window is way below 1 MiB/s.
        let err = rl
            .on_complete(DataDir::Write, 4096, Duration::from_millis(300))
            .unwrap_err();
        assert!(matches!(err, Error::RateTooLow { .. }));
    }

    #[test]
    fn test_min_rate_window_passes_and_rolls() {
        let mut rl = RateLimiter::new(
            RateSpec::default(),
            RateSpec {
                bytes_min: 1024,
                ..Default::default()
            },
            100,
            false,
        );
        // 1 MiB in the first 100ms window: comfortably above floor.
        rl.on_complete(DataDir::Write, 1 << 20, Duration::from_millis(120))
            .unwrap();
        // Next window starts at 120ms; another healthy window passes too.
        rl.on_complete(DataDir::Write, 1 << 20, Duration::from_millis(240))
            .unwrap();
    }

    #[test]
    fn test_reset_clears_debt() {
        let mut rl = bytes_cap(1024);
        rl.on_complete(DataDir::Write, 1 << 20, Duration::from_millis(1))
            .unwrap();
        rl.reset();
        let action = rl
            .on_complete(DataDir::Write, 512, Duration::from_millis(500))
            .unwrap();
        assert_eq!(action, None);
    }
}
