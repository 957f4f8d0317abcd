//! Supervisor: the only owner of cross-worker state.
//!
//! Spawns one thread per worker, watches the wall clock, and reaps. Workers
//! never see each other; each gets an `Arc<WorkerShared>` handle exposing
//! just the terminate flag and its own runstate. Stats are read only after
//! a worker reaches `Exited`, then merged into the job summary.

use crate::config::Options;
use crate::error::{Error, ErrorKind, Result};
use crate::stats::WorkerStats;
use crate::worker::{RunState, Worker, WorkerReport, WorkerShared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Wall-clock grace on top of the configured runtime before the watchdog
/// pulls the plug.
const WATCHDOG_GRACE: Duration = Duration::from_secs(10);

/// One worker's error, with context for the final report.
#[derive(Debug)]
pub struct WorkerFailure {
    pub worker: usize,
    pub kind: ErrorKind,
    pub errno: Option<i32>,
    pub message: String,
}

/// Collated outcome of a job.
#[derive(Debug)]
pub struct JobSummary {
    pub name: String,
    /// All workers merged.
    pub stats: WorkerStats,
    pub per_worker: Vec<WorkerReport>,
    pub failures: Vec<WorkerFailure>,
    pub elapsed: Duration,
}

impl JobSummary {
    /// Process exit code: 0 clean, 1 any worker errored.
    pub fn exit_code(&self) -> i32 {
        if self.failures.is_empty() {
            0
        } else {
            1
        }
    }
}

struct WorkerSlot {
    shared: Arc<WorkerShared>,
    handle: JoinHandle<WorkerReport>,
}

pub struct Supervisor {
    opts: Arc<Options>,
    workers: Vec<WorkerSlot>,
    started: Instant,
}

impl Supervisor {
    /// Spawn every worker of the job. Options must be validated already.
    pub fn spawn(opts: Options) -> Result<Self> {
        let opts = Arc::new(opts);
        let mut workers = Vec::with_capacity(opts.concurrency.numjobs as usize);

        for id in 0..opts.concurrency.numjobs as usize {
            let shared = Arc::new(WorkerShared::new());
            let worker = Worker::new(id, opts.clone(), shared.clone())?;
            let name = format!("{}-w{}", opts.name, id);
            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || worker.run())
                .map_err(|_| Error::ResourceExhausted("worker thread"))?;
            workers.push(WorkerSlot { shared, handle });
        }

        log::debug!(
            "job {}: spawned {} worker(s)",
            opts.name,
            opts.concurrency.numjobs
        );
        Ok(Self {
            opts,
            workers,
            started: Instant::now(),
        })
    }

    /// Raise every worker's terminate flag.
    pub fn terminate_all(&self) {
        for slot in &self.workers {
            slot.shared.terminate();
        }
    }

    /// Live worker states, for progress reporting.
    pub fn states(&self) -> Vec<RunState> {
        self.workers.iter().map(|s| s.shared.state()).collect()
    }

    /// Wait for every worker, enforcing the runtime watchdog, and collate.
    pub fn wait(self) -> JobSummary {
        let Supervisor {
            opts,
            workers,
            started,
        } = self;

        // Backstop: workers enforce their own runtime; the watchdog only
        // fires if one wedges in an engine or a blocking reap.
        let watchdog = (opts.workload.runtime > 0).then(|| {
            let deadline = started + Duration::from_secs(opts.workload.runtime) + WATCHDOG_GRACE;
            let stop = Arc::new(AtomicBool::new(false));
            let shareds: Vec<Arc<WorkerShared>> =
                workers.iter().map(|s| s.shared.clone()).collect();
            let flag = stop.clone();
            let handle = std::thread::spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    if Instant::now() >= deadline {
                        log::warn!("runtime watchdog fired, terminating workers");
                        for shared in &shareds {
                            shared.terminate();
                        }
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            });
            (stop, handle)
        });

        let mut per_worker = Vec::with_capacity(workers.len());
        let mut merged = WorkerStats::new();
        let mut failures = Vec::new();

        for slot in workers {
            let report = match slot.handle.join() {
                Ok(report) => report,
                Err(_) => {
                    log::error!("a worker thread panicked");
                    failures.push(WorkerFailure {
                        worker: per_worker.len(),
                        kind: ErrorKind::EngineError,
                        errno: None,
                        message: "worker thread panicked".into(),
                    });
                    continue;
                }
            };
            debug_assert_eq!(slot.shared.state(), RunState::Exited);
            slot.shared.mark_reaped();

            merged.merge(&report.stats);
            if let Some(kind) = report.error.first_kind() {
                failures.push(WorkerFailure {
                    worker: report.id,
                    kind,
                    errno: report.error.first_errno(),
                    message: report.error.first_message().unwrap_or("").to_string(),
                });
            }
            per_worker.push(report);
        }

        if let Some((stop, handle)) = watchdog {
            stop.store(true, Ordering::Relaxed);
            let _ = handle.join();
        }

        let elapsed = started.elapsed();
        if merged.runtime().is_zero() {
            merged.set_runtime(elapsed);
        }
        JobSummary {
            name: opts.name.clone(),
            stats: merged,
            per_worker,
            failures,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::workload::{BsSpec, EngineKind, FallocateMode, RwMode};
    use crate::config::Options;

    fn job(dir: &std::path::Path) -> Options {
        let mut opts = Options::default();
        opts.name = "sup".into();
        opts.workload.engine = EngineKind::Mock;
        opts.workload.rw = RwMode::Write;
        opts.workload.bs = BsSpec::Fixed(4096);
        opts.workload.size = 32 * 1024;
        opts.files.fallocate = FallocateMode::None;
        opts.files.directory = Some(dir.to_path_buf());
        opts
    }

    #[test]
    fn test_spawn_wait_merges_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = job(dir.path());
        opts.concurrency.numjobs = 3;
        // Distinct files per worker would collide on the same path with the
        // mock engine; that's fine, the mock ignores fds.
        let summary = Supervisor::spawn(opts).unwrap().wait();

        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.per_worker.len(), 3);
        assert_eq!(
            summary.stats.dir(crate::config::workload::DataDir::Write).io_blocks,
            3 * 8
        );
    }

    #[test]
    fn test_terminate_all_ends_time_based_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = job(dir.path());
        opts.workload.time_based = true;
        opts.workload.runtime = 60;

        let sup = Supervisor::spawn(opts).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        sup.terminate_all();
        let summary = sup.wait();
        assert_eq!(summary.exit_code(), 0);
        assert!(summary.elapsed < Duration::from_secs(30));
    }

    #[test]
    fn test_failure_surfaces_in_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = job(dir.path());
        // Sync engine against a directory that vanishes under it.
        opts.workload.engine = EngineKind::Sync;
        opts.files.directory = Some(dir.path().join("missing"));
        let summary = Supervisor::spawn(opts).unwrap().wait();
        assert_eq!(summary.exit_code(), 1);
        assert!(!summary.failures.is_empty());
    }
}
