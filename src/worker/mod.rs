//! Worker: one independent execution of a job.
//!
//! A worker owns its files, PRNG streams, IO unit pool, buffers, engine
//! binding, and statistics; nothing here is shared with other workers. The
//! supervisor sees only the [`WorkerShared`] handle (runstate + terminate
//! flag) while the worker runs, and the [`WorkerReport`] once it exits.
//!
//! Lifecycle: `Created → Initialized → [Ramp] → Running ⇄ Verifying ⇄
//! Fsyncing → Exited → Reaped`. Ramp issues IO but discards its samples;
//! on expiry every statistic resets and the measured phase begins. The
//! main loop claims a unit, draws direction, size, and offset, submits
//! through the engine contract, and reaps according to the batch policy,
//! feeding stats, the rate limiter, and the verify history.

pub mod affinity;

use crate::config::workload::{DataDir, FileServiceType};
use crate::config::Options;
use crate::distribution::{BsSplitter, DirChooser, OffsetGenerator};
use crate::engine::{self, Cqe, IoEngine, IoOp, QueueResult, Sqe};
use crate::error::{Error, ErrorSlot, Result};
use crate::ioq::{IoUnit, IoUnitPool};
use crate::output::log::SampleLog;
use crate::rate::RateLimiter;
use crate::rng::{RandSource, RandStream, SeedSet};
use crate::stats::WorkerStats;
use crate::target::{FileService, JobFile, OpenHow};
use crate::util::buffer::IoBuffers;
use crate::util::fast_time::{Clock, FastInstant};
use crate::verify::history::{HistoryEntry, WriteHistory};
use crate::verify::pool::{AsyncVerifier, VerifyJob};
use crate::verify::{self, VerifyConfig};
use rand::RngCore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Worker lifecycle states, visible to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RunState {
    Created = 0,
    Initialized = 1,
    Ramp = 2,
    Running = 3,
    Verifying = 4,
    Fsyncing = 5,
    Exited = 6,
    Reaped = 7,
}

impl RunState {
    pub fn from_u8(v: u8) -> RunState {
        match v {
            0 => RunState::Created,
            1 => RunState::Initialized,
            2 => RunState::Ramp,
            3 => RunState::Running,
            4 => RunState::Verifying,
            5 => RunState::Fsyncing,
            6 => RunState::Exited,
            _ => RunState::Reaped,
        }
    }
}

/// The supervisor's view of a live worker.
#[derive(Debug)]
pub struct WorkerShared {
    runstate: AtomicU8,
    terminate: Arc<AtomicBool>,
}

impl WorkerShared {
    pub fn new() -> Self {
        Self {
            runstate: AtomicU8::new(RunState::Created as u8),
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.runstate.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RunState) {
        // Monotone past Initialized; cycling is confined to the
        // Running/Verifying/Fsyncing band.
        debug_assert!(
            state >= self.state()
                || matches!(
                    (self.state(), state),
                    (
                        RunState::Running | RunState::Verifying | RunState::Fsyncing,
                        RunState::Running | RunState::Verifying | RunState::Fsyncing
                    )
                )
        );
        self.runstate.store(state as u8, Ordering::Release);
    }

    /// Supervisor-side transition after the report is collected.
    pub fn mark_reaped(&self) {
        self.runstate.store(RunState::Reaped as u8, Ordering::Release);
    }

    pub fn is_terminating(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }

    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }

    pub fn terminate_flag(&self) -> Arc<AtomicBool> {
        self.terminate.clone()
    }
}

impl Default for WorkerShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a worker leaves behind.
#[derive(Debug)]
pub struct WorkerReport {
    pub id: usize,
    pub stats: WorkerStats,
    pub error: ErrorSlot,
}

/// Why an IO phase stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseEnd {
    /// Every file's offsets are spent.
    Exhausted,
    /// The byte target was reached.
    BytesDone,
    /// The wall-clock budget ran out.
    Deadline,
    /// The terminate flag was raised.
    Terminated,
    /// fill_device hit ENOSPC.
    FillDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitOutcome {
    Submitted,
    /// Freelist empty: reap before submitting more.
    NoUnit,
    /// The chosen file has no offsets left.
    FileDone,
    /// Every file is spent.
    AllDone,
    /// ENOSPC under fill_device surfaced from an inline completion.
    FillDevice,
}

pub struct Worker {
    id: usize,
    opts: Arc<Options>,
    shared: Arc<WorkerShared>,

    engine: Box<dyn IoEngine>,
    files: Vec<JobFile>,
    file_done: Vec<bool>,
    pool: IoUnitPool,
    buffers: IoBuffers,
    stats: WorkerStats,
    error: ErrorSlot,
    clock: Clock,

    dir_chooser: DirChooser,
    bs_splitter: BsSplitter,
    offset_gen: OffsetGenerator,
    file_service: FileService,
    rate: RateLimiter,

    rng_offset: RandSource,
    rng_bs: RandSource,
    rng_verify: RandSource,
    rng_trim: RandSource,
    rng_rwmix: RandSource,
    rng_file_size: RandSource,
    rng_file_service: RandSource,
    rng_buf_fill: RandSource,

    verify_cfg: Option<VerifyConfig>,
    history: WriteHistory,
    async_verify: Option<AsyncVerifier>,
    verify_serial: u64,
    backlog_pending: bool,

    queued_since_commit: u32,
    blocks_since_fsync: u32,
    blocks_since_fdatasync: u32,
    phase_start: FastInstant,
    phase_bytes: u64,
    measured: bool,

    lat_log: SampleLog,
    clat_log: SampleLog,
    bw_log: SampleLog,
    bw_window_start: Duration,
    bw_window_bytes: [u64; 2],
}

impl Worker {
    pub fn new(id: usize, opts: Arc<Options>, shared: Arc<WorkerShared>) -> Result<Self> {
        let engine = engine::create(opts.workload.engine)?;

        let seeds = if let Some(explicit) = opts.rand.rand_seeds {
            SeedSet::explicit(explicit)
        } else if opts.rand.rand_repeatable {
            SeedSet::repeatable(opts.rand.rand_seed, id as u32)
        } else {
            SeedSet::from_entropy()
        };
        let os_rand = opts.rand.use_os_rand;

        let w = &opts.workload;
        let bs_splitter = BsSplitter::new(w.bs_specs(), w.block_align(), w.bs_unaligned);
        let offset_gen = OffsetGenerator::new(w.rw.is_random(), w.seq_mode)
            .with_zones(w.zone_size, w.zone_skip)
            .with_stride(w.ddir_seq_nr, w.ddir_seq_add)
            .with_soft_map(w.softrandommap);
        let dir_chooser = DirChooser::new(w.rw, w.rwmix_read, w.trim_percent, w.rwmix_cycle);
        let file_service =
            FileService::new(opts.files.file_service_type, opts.files.file_service_nr);
        let rate = RateLimiter::new(
            opts.rate.read_spec(),
            opts.rate.write_spec(),
            opts.rate.ratecycle,
            opts.rate.no_stall,
        );

        let depth = opts.concurrency.iodepth as usize;
        let buffers = IoBuffers::allocate(
            opts.buffers.mem_type,
            depth,
            w.max_bs() as usize,
            opts.buffers.mem_align as usize,
            opts.buffers.hugepage_size as usize,
        )?;

        let verify_cfg = if opts.verify.enabled() {
            Some(VerifyConfig {
                mode: opts.verify.verify,
                interval: opts.verify.verify_interval,
                header_offset: opts.verify.verify_offset,
                pattern: opts.verify.pattern_bytes()?,
                dump: opts.verify.verify_dump,
            })
        } else {
            None
        };
        let sorted_history = opts.files.overwrite || opts.verify.verify_sort;

        let nr_files = opts.files.nr_files as usize;
        Ok(Self {
            id,
            engine,
            files: Vec::with_capacity(nr_files),
            file_done: vec![false; nr_files],
            pool: IoUnitPool::new(depth),
            buffers,
            stats: WorkerStats::new(),
            error: ErrorSlot::new(),
            clock: Clock::new(opts.timing.clocksource),
            dir_chooser,
            bs_splitter,
            offset_gen,
            file_service,
            rate,
            rng_offset: seeds.source(RandStream::Offset, os_rand),
            rng_bs: seeds.source(RandStream::BlockSize, os_rand),
            rng_verify: seeds.source(RandStream::Verify, os_rand),
            rng_trim: seeds.source(RandStream::Trim, os_rand),
            rng_rwmix: seeds.source(RandStream::RwMix, os_rand),
            rng_file_size: seeds.source(RandStream::FileSize, os_rand),
            rng_file_service: seeds.source(RandStream::FileService, os_rand),
            rng_buf_fill: seeds.source(RandStream::BufFill, os_rand),
            verify_cfg,
            history: WriteHistory::new(sorted_history),
            async_verify: None,
            verify_serial: 0,
            backlog_pending: false,
            queued_since_commit: 0,
            blocks_since_fsync: 0,
            blocks_since_fdatasync: 0,
            phase_start: FastInstant::now(),
            phase_bytes: 0,
            measured: true,
            lat_log: SampleLog::new(),
            clat_log: SampleLog::new(),
            bw_log: SampleLog::new(),
            bw_window_start: Duration::ZERO,
            bw_window_bytes: [0; 2],
            opts,
            shared,
        })
    }

    /// Swap in a pre-built engine; tests use this to inject the mock.
    pub fn with_engine(mut self, engine: Box<dyn IoEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Run the job to completion and hand back the report.
    pub fn run(mut self) -> WorkerReport {
        if let Err(err) = self.run_inner() {
            log::error!("worker {}: {}", self.id, err);
            // Errors that went through the policy path are already in the
            // slot; anything else (setup, engine init) lands here.
            if !self.error.is_set() {
                self.stats.bump_errors();
                self.error.record(&err);
            }
        }
        self.teardown();
        self.shared.set_state(RunState::Exited);
        WorkerReport {
            id: self.id,
            stats: self.stats,
            error: self.error,
        }
    }

    fn run_inner(&mut self) -> Result<()> {
        if let Some(mask) = self.opts.concurrency.cpumask {
            affinity::set_cpu_affinity(mask)?;
        }
        if let Some(nice) = self.opts.concurrency.nice {
            affinity::set_nice(nice)?;
        }

        self.setup_files()?;
        self.engine.init(self.opts.concurrency.iodepth as usize)?;
        self.prefill_buffers();
        self.spawn_async_verify();
        self.shared.set_state(RunState::Initialized);

        let runtime = (self.opts.workload.runtime > 0)
            .then(|| Duration::from_secs(self.opts.workload.runtime));

        // Ramp: issue IO, then throw the samples away.
        if self.opts.workload.ramp_time > 0 {
            self.shared.set_state(RunState::Ramp);
            self.measured = false;
            let ramp = Duration::from_secs(self.opts.workload.ramp_time);
            self.begin_phase();
            self.io_phase(Some(ramp))?;
            self.drain_inflight()?;
            self.restart_files();
            self.stats.reset();
            self.rate.reset();
            self.lat_log.clear();
            self.clat_log.clear();
            self.bw_log.clear();
        }

        self.measured = true;
        self.stats.mark_start();
        let measured_start = self.clock.now();

        for pass in 0..self.opts.workload.loops {
            if self.shared.is_terminating() {
                break;
            }
            if pass > 0 {
                self.restart_all();
            }

            self.shared.set_state(RunState::Running);
            self.begin_phase();
            let deadline = runtime.map(|r| r.saturating_sub(measured_start.elapsed()));
            if matches!(deadline, Some(d) if d.is_zero()) {
                break;
            }
            let end = self.io_phase(deadline)?;
            self.drain_inflight()?;

            if self.verify_cfg.is_some() && !self.history.is_empty() {
                self.shared.set_state(RunState::Verifying);
                self.verify_entries(None)?;
            }

            if end == PhaseEnd::Terminated || end == PhaseEnd::Deadline {
                break;
            }
        }

        if self.opts.files.end_fsync {
            self.shared.set_state(RunState::Fsyncing);
            self.fsync_files()?;
        }

        self.finish_async_verify()?;
        self.stats.mark_end(measured_start.elapsed());
        Ok(())
    }

    // ----- setup / teardown -----

    fn setup_files(&mut self) -> Result<()> {
        let f = &self.opts.files;
        let open_how = self.open_how();
        for i in 0..f.nr_files as usize {
            let size = match (f.file_size_low, f.file_size_high) {
                (Some(low), Some(high)) if high > low => {
                    low + self.rng_file_size.next_below(high - low + 1)
                }
                (Some(low), _) => low,
                _ => self.opts.workload.size,
            };
            let mut file = JobFile::new(self.opts.file_path(i), self.opts.workload.offset, size);
            if !f.create_on_open {
                file.open(&open_how)?;
                if self.opts.workload.wants_random_map() {
                    file.init_random_map(self.opts.workload.min_bs());
                }
                if f.pre_read {
                    let mut scratch = vec![0u8; 1 << 20];
                    file.pre_read(&mut scratch)?;
                }
            }
            self.files.push(file);
        }
        Ok(())
    }

    fn open_how(&self) -> OpenHow {
        let f = &self.opts.files;
        OpenHow {
            create: self.opts.workload.rw.has_writes() || f.filename.is_none(),
            odirect: f.odirect,
            sync_io: f.sync_io,
            fallocate: f.fallocate,
            create_fsync: f.create_fsync,
            create_serialize: f.create_serialize,
        }
    }

    fn prefill_buffers(&mut self) {
        if self.opts.buffers.zero_buffers {
            return; // regions start zeroed
        }
        for i in 0..self.buffers.count() {
            self.rng_buf_fill.fill_bytes(self.buffers.unit_mut(i));
        }
    }

    fn spawn_async_verify(&mut self) {
        let v = &self.opts.verify;
        if v.verify_async == 0 || !v.enabled() {
            return;
        }
        let cfg = self.verify_cfg.clone().expect("verify enabled");
        let paths: Vec<PathBuf> = self.files.iter().map(|f| f.path().to_path_buf()).collect();
        let backlog = if v.verify_backlog == 0 {
            self.opts.concurrency.iodepth as usize * 2
        } else {
            v.verify_backlog as usize
        };
        self.async_verify = Some(AsyncVerifier::spawn(
            cfg,
            Arc::new(paths),
            v.verify_async as usize,
            backlog,
            v.verify_batch as usize,
            v.verify_fatal,
            self.shared.terminate_flag(),
        ));
    }

    fn finish_async_verify(&mut self) -> Result<()> {
        let Some(pool) = self.async_verify.take() else {
            return Ok(());
        };
        let (mismatches, first) = pool.finish();
        for _ in 0..mismatches {
            self.stats.bump_errors();
        }
        if let Some(err) = first {
            self.error.record(&err);
            if self.opts.verify.verify_fatal {
                return Err(err);
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        // Cancel whatever is still in flight before buffers go away.
        for idx in self.pool.busy_units().to_vec() {
            let _ = self.engine.cancel(idx);
        }
        let _ = self.drain_inflight();
        self.engine.cleanup();

        if let Some(pool) = self.async_verify.take() {
            let _ = pool.finish();
        }

        let fsync_on_close = self.opts.files.fsync_on_close;
        let unlink = self.opts.files.unlink;
        for file in self.files.iter_mut() {
            if let Err(e) = file.close(fsync_on_close) {
                log::warn!("close {}: {}", file.path().display(), e);
            }
            if unlink {
                if let Err(e) = file.unlink() {
                    log::warn!("unlink {}: {}", file.path().display(), e);
                }
            }
        }

        self.write_sample_logs();
    }

    fn write_sample_logs(&self) {
        let t = &self.opts.timing;
        let jobs = [
            (&t.lat_log, &self.lat_log),
            (&t.clat_log, &self.clat_log),
            (&t.bw_log, &self.bw_log),
        ];
        for (base, log) in jobs {
            let Some(base) = base else { continue };
            if log.is_empty() {
                continue;
            }
            let path = base.with_extension(format!("{}.log", self.id));
            if let Err(e) = log.write_csv(&path) {
                log::warn!("sample log {}: {}", path.display(), e);
            }
        }
    }

    // ----- phase plumbing -----

    fn begin_phase(&mut self) {
        self.phase_start = self.clock.now();
        self.phase_bytes = 0;
        self.bw_window_start = Duration::ZERO;
        self.bw_window_bytes = [0; 2];
        self.rate.reset();
    }

    fn restart_files(&mut self) {
        for file in self.files.iter_mut() {
            file.restart();
        }
        self.file_done.fill(false);
        self.file_service.restart();
    }

    /// Full rewind between loop passes: files, generators, and the
    /// dedicated streams, so every pass issues the identical sequence.
    fn restart_all(&mut self) {
        self.restart_files();
        self.dir_chooser.restart();
        self.rng_offset.restart();
        self.rng_bs.restart();
        self.rng_trim.restart();
        self.rng_rwmix.restart();
        self.rng_file_service.restart();
    }

    fn phase_elapsed(&self) -> Duration {
        self.clock.now().duration_since(self.phase_start)
    }

    /// Total bytes this phase wants; 0 = unbounded (time_based or
    /// fill_device).
    fn target_bytes(&self) -> u64 {
        if self.opts.workload.time_based || self.opts.workload.fill_device {
            return 0;
        }
        self.files.iter().map(|f| f.size()).sum()
    }

    // ----- the main loop -----

    fn io_phase(&mut self, deadline: Option<Duration>) -> Result<PhaseEnd> {
        let depth = self.opts.concurrency.iodepth as usize;
        let target = self.target_bytes();

        loop {
            if self.shared.is_terminating() {
                return Ok(PhaseEnd::Terminated);
            }
            if let Some(limit) = deadline {
                if self.phase_elapsed() >= limit {
                    return Ok(PhaseEnd::Deadline);
                }
            }
            if target > 0 && self.phase_bytes >= target {
                return Ok(PhaseEnd::BytesDone);
            }

            // Interleaved verification once the backlog trips.
            if self.backlog_pending {
                self.backlog_pending = false;
                self.drain_inflight()?;
                self.shared.set_state(RunState::Verifying);
                self.verify_entries(Some(self.opts.verify.verify_batch as usize))?;
                self.shared.set_state(RunState::Running);
            }

            // Fill the queue.
            let mut submitted_any = false;
            let mut exhausted = false;
            while self.pool.busy_count() < depth {
                if self.shared.is_terminating() {
                    return Ok(PhaseEnd::Terminated);
                }
                if target > 0 && self.phase_bytes >= target {
                    break;
                }
                match self.submit_one()? {
                    SubmitOutcome::Submitted => submitted_any = true,
                    SubmitOutcome::NoUnit => break,
                    SubmitOutcome::FileDone => continue,
                    SubmitOutcome::AllDone => {
                        exhausted = true;
                        break;
                    }
                    SubmitOutcome::FillDevice => {
                        self.drain_inflight()?;
                        return Ok(PhaseEnd::FillDevice);
                    }
                }
            }

            if exhausted {
                if self.opts.workload.time_based
                    && !matches!(deadline, Some(limit) if self.phase_elapsed() >= limit)
                {
                    self.restart_files();
                    continue;
                }
                self.drain_inflight()?;
                return Ok(PhaseEnd::Exhausted);
            }

            // Flush stragglers below the batch threshold.
            if self.queued_since_commit > 0 {
                self.engine.commit()?;
                self.queued_since_commit = 0;
            }

            // Reap according to the completion batch policy. A full queue
            // drains down to iodepth_low before submission resumes.
            if self.pool.busy_count() > 0 {
                let min = if submitted_any && self.pool.busy_count() < depth {
                    0
                } else {
                    let low = self.opts.concurrency.iodepth_low as usize;
                    if low > 0 && self.pool.busy_count() >= depth {
                        self.pool.busy_count() - low
                    } else {
                        1
                    }
                };
                if let Some(PhaseEnd::FillDevice) = self.reap(min)? {
                    self.drain_inflight()?;
                    return Ok(PhaseEnd::FillDevice);
                }
            }
        }
    }

    fn next_file(&mut self) -> Option<usize> {
        let nr = self.files.len();
        if self.file_done.iter().all(|&d| d) {
            return None;
        }
        let fi = self.file_service.next(nr, &mut self.rng_file_service);
        if !self.file_done[fi] {
            return Some(fi);
        }
        // Service picked a spent file: take the next live one.
        (0..nr).map(|i| (fi + i) % nr).find(|&i| !self.file_done[i])
    }

    fn submit_one(&mut self) -> Result<SubmitOutcome> {
        // Requeued remainders go out first, untouched.
        if let Some(idx) = self.pool.take_requeued() {
            return self.submit_unit(idx).map(|end| match end {
                Some(PhaseEnd::FillDevice) => SubmitOutcome::FillDevice,
                _ => SubmitOutcome::Submitted,
            });
        }

        let Some(fi) = self.next_file() else {
            return Ok(SubmitOutcome::AllDone);
        };

        if !self.files[fi].is_open() {
            let how = self.open_how();
            self.files[fi].open(&how)?;
            if self.opts.workload.wants_random_map() && self.files[fi].random_map.is_none() {
                self.files[fi].init_random_map(self.opts.workload.min_bs());
            }
        }

        let now = self.clock.now();
        let Some(idx) = self.pool.get(now) else {
            return Ok(SubmitOutcome::NoUnit);
        };

        let dir = self
            .dir_chooser
            .next(&mut self.rng_rwmix, &mut self.rng_trim);
        let region = self.files[fi].size().max(1);
        let bs = self.bs_splitter.next(dir, &mut self.rng_bs, region);
        let min_bs = self.opts.workload.min_bs();

        let placed = if bs == 0 {
            None
        } else {
            let file = &mut self.files[fi];
            self.offset_gen.next(
                &mut file.cursor,
                file.random_map.as_mut(),
                dir,
                bs,
                min_bs,
                &mut self.rng_offset,
            )
        };
        let Some((offset, len)) = placed else {
            self.pool.put(idx);
            self.file_done[fi] = true;
            if self.opts.files.file_service_type == FileServiceType::Sequential {
                self.file_service.advance(self.files.len());
            }
            return Ok(SubmitOutcome::FileDone);
        };

        // Fill in the unit and its buffer.
        let (seed, serial) = if dir == DataDir::Write && self.verify_cfg.is_some() {
            self.verify_serial += 1;
            (Some(self.rng_verify.next_u64()), self.verify_serial)
        } else {
            (None, 0)
        };
        {
            let unit = self.pool.unit_mut(idx);
            unit.op = match dir {
                DataDir::Read => IoOp::Read,
                DataDir::Write => IoOp::Write,
                DataDir::Trim => IoOp::Trim,
            };
            unit.dir = dir;
            unit.file_index = fi;
            unit.offset = offset;
            unit.len = len;
            unit.verify_seed = seed;
            unit.verify_serial = serial;
        }
        if dir == DataDir::Write {
            self.fill_write_buffer(idx, offset, len as usize, seed, serial);
        }

        let end = self.submit_unit(idx)?;

        if self.measured && self.opts.timing.depth_maps_enabled() {
            self.stats.record_submit_depth(self.pool.busy_count() as u64);
            self.stats.record_queue_depth(self.pool.busy_count() as u64);
        }
        Ok(match end {
            Some(PhaseEnd::FillDevice) => SubmitOutcome::FillDevice,
            _ => SubmitOutcome::Submitted,
        })
    }

    fn fill_write_buffer(
        &mut self,
        idx: usize,
        offset: u64,
        len: usize,
        seed: Option<u64>,
        serial: u64,
    ) {
        if let Some(seed) = seed {
            let cfg = self.verify_cfg.clone().expect("seed implies verify");
            let slice = &mut self.buffers.unit_mut(idx)[..len];
            verify::fill_block(&cfg, slice, offset, seed, serial);
            return;
        }
        let b = &self.opts.buffers;
        if b.zero_buffers {
            return;
        }
        if b.refill_buffers {
            self.rng_buf_fill
                .fill_bytes(&mut self.buffers.unit_mut(idx)[..len]);
        } else if b.scramble_buffers {
            // Cheap perturbation: stamp the offset and poke one random word.
            if len >= 16 {
                let word = 8 + (self.rng_buf_fill.next_below((len / 8 - 1) as u64) as usize) * 8;
                let noise = self.rng_buf_fill.next_u64();
                let slice = self.buffers.unit_mut(idx);
                slice[..8].copy_from_slice(&offset.to_le_bytes());
                slice[word..word + 8].copy_from_slice(&noise.to_le_bytes());
            }
        }
    }

    /// Push one unit through the engine, honoring Busy and the submit
    /// batch size. Inline completions are processed here, so the returned
    /// phase-end signal (fill_device) must be propagated.
    fn submit_unit(&mut self, idx: usize) -> Result<Option<PhaseEnd>> {
        let unit = self.pool.unit(idx);
        let fd = self.files[unit.file_index].fd();
        let sqe = Sqe {
            op: unit.op,
            fd,
            offset: unit.offset,
            buf: if unit.op.has_buffer() {
                // SAFETY: idx is in range and buf_shift < the slice length.
                unsafe { self.buffers.unit_ptr(idx).add(unit.buf_shift as usize) }
            } else {
                std::ptr::null_mut()
            },
            len: unit.len as usize,
            unit: idx,
        };

        self.engine.prep(&sqe)?;
        loop {
            match self.engine.queue(sqe)? {
                QueueResult::Completed(result) => {
                    self.pool.mark_issued(idx, self.clock.now());
                    self.pool.mark_complete(idx, result, self.clock.now());
                    return self.finish_completion(idx);
                }
                QueueResult::Queued => {
                    self.pool.mark_issued(idx, self.clock.now());
                    self.queued_since_commit += 1;
                    if self.queued_since_commit >= self.opts.concurrency.batch() {
                        self.engine.commit()?;
                        self.queued_since_commit = 0;
                    }
                    return Ok(None);
                }
                QueueResult::Busy => {
                    // Make room: flush and reap one completion, then retry.
                    self.engine.commit()?;
                    self.queued_since_commit = 0;
                    self.reap(1)?;
                }
            }
        }
    }

    /// Reap up to the completion batch, at least `min`.
    fn reap(&mut self, min: usize) -> Result<Option<PhaseEnd>> {
        let max = (self.opts.concurrency.batch_complete() as usize).max(1);
        let min = min.min(self.pool.busy_count()).min(max);
        let n = self.engine.getevents(min, max, None)?;
        if self.measured && n > 0 && self.opts.timing.depth_maps_enabled() {
            self.stats.record_complete_depth(n as u64);
        }
        let mut ended = None;
        for i in 0..n {
            let cqe: Cqe = self.engine.event(i);
            self.pool.mark_complete(cqe.unit, cqe.result, self.clock.now());
            if let Some(end) = self.finish_completion(cqe.unit)? {
                ended = Some(end);
            }
        }
        Ok(ended)
    }

    /// Block until nothing is in flight.
    fn drain_inflight(&mut self) -> Result<()> {
        if self.queued_since_commit > 0 {
            self.engine.commit()?;
            self.queued_since_commit = 0;
        }
        while self.pool.busy_count() > 0 {
            let before = self.pool.busy_count();
            self.reap(1)?;
            if self.pool.busy_count() == before {
                // Nothing reapable: inline-completing engines never leave
                // units here.
                break;
            }
        }
        Ok(())
    }

    /// All bookkeeping for one completed unit. Returns a phase-end signal
    /// for fill_device ENOSPC.
    fn finish_completion(&mut self, idx: usize) -> Result<Option<PhaseEnd>> {
        let unit = self.pool.unit(idx).clone();
        let result = unit.result.expect("completion without result");

        // Sync ops carry no payload accounting.
        if matches!(unit.op, IoOp::Fsync | IoOp::Fdatasync) {
            self.pool.put(idx);
            if let Err(errno) = result {
                self.absorb_error(Error::from_raw_os_error(errno))?;
            }
            return Ok(None);
        }

        let n = match result {
            Err(errno) => {
                self.pool.put(idx);
                if errno == libc::ENOSPC && self.opts.workload.fill_device {
                    return Ok(Some(PhaseEnd::FillDevice));
                }
                self.absorb_error(Error::from_raw_os_error(errno))?;
                return Ok(None);
            }
            Ok(n) => n,
        };

        // Partial transfer: account what moved, requeue the remainder.
        if n > 0 && (n as u32) < unit.len && unit.op.has_buffer() {
            self.account_completion(&unit, n)?;
            let u = self.pool.unit_mut(idx);
            u.offset += n as u64;
            u.len -= n as u32;
            u.buf_shift += n as u32;
            self.pool.requeue(idx);
            return Ok(None);
        }

        self.account_completion(&unit, n)?;

        if unit.dir == DataDir::Write && self.verify_cfg.is_some() && n > 0 {
            self.history.record(HistoryEntry::for_write(
                unit.file_index,
                unit.offset,
                n as u32,
                unit.verify_seed.unwrap_or(0),
                unit.verify_serial,
            ));
            let backlog = self.opts.verify.verify_backlog;
            if backlog > 0 && self.history.len() >= backlog as usize {
                self.backlog_pending = true;
            }
        }
        if unit.dir == DataDir::Trim && self.verify_cfg.is_some() {
            self.history.discard_range(unit.offset, unit.len);
        }

        self.pool.put(idx);
        self.periodic_sync(unit.dir)?;
        Ok(None)
    }

    /// Stats, logs, and pacing for `n` completed bytes of `unit`.
    fn account_completion(&mut self, unit: &IoUnit, n: usize) -> Result<()> {
        let t = &self.opts.timing;
        let slat = if t.slat_enabled() {
            self.pool.slat_us(unit.index)
        } else {
            None
        };
        let clat = if t.clat_enabled() {
            self.pool.clat_us(unit.index)
        } else {
            None
        };
        let lat = if t.lat_enabled() {
            match (self.pool.slat_us(unit.index), self.pool.clat_us(unit.index)) {
                (Some(s), Some(c)) => Some(s + c),
                _ => None,
            }
        } else {
            None
        };

        self.phase_bytes += n as u64;

        if self.measured {
            self.stats.record_completion(unit.dir, n, slat, clat, lat);

            let elapsed = self.phase_elapsed();
            let ms = elapsed.as_millis() as u64;
            if let Some(clat) = clat {
                if t.clat_log.is_some() {
                    self.clat_log.add(ms, clat, unit.dir, unit.len);
                }
                if t.lat_log.is_some() {
                    self.lat_log.add(ms, clat + slat.unwrap_or(0), unit.dir, unit.len);
                }
            }
            if t.bw_enabled() && t.bw_log.is_some() {
                self.bw_sample(unit.dir, n, elapsed);
            }
        }

        // Pacing applies in ramp too; only the samples are discarded.
        match self.rate.on_complete(unit.dir, n, self.phase_elapsed()) {
            Ok(None) => {}
            Ok(Some(sleep)) => {
                if !self.shared.is_terminating() {
                    std::thread::sleep(sleep);
                }
            }
            Err(err) => {
                self.absorb_error(err)?;
            }
        }
        Ok(())
    }

    fn bw_sample(&mut self, dir: DataDir, n: usize, elapsed: Duration) {
        let slot = if dir == DataDir::Read { 0 } else { 1 };
        self.bw_window_bytes[slot] += n as u64;
        let window = Duration::from_millis(self.opts.timing.bw_avg_time.max(1));
        let since = elapsed.saturating_sub(self.bw_window_start);
        if since >= window {
            let ms = since.as_millis().max(1) as u64;
            for (i, d) in [DataDir::Read, DataDir::Write].iter().enumerate() {
                if self.bw_window_bytes[i] > 0 {
                    // KiB/s over the window.
                    let rate = self.bw_window_bytes[i] * 1000 / ms / 1024;
                    self.bw_log.add(elapsed.as_millis() as u64, rate, *d, 0);
                }
            }
            self.bw_window_start = elapsed;
            self.bw_window_bytes = [0; 2];
        }
    }

    /// fsync/fdatasync cadence after written blocks.
    fn periodic_sync(&mut self, dir: DataDir) -> Result<()> {
        if dir != DataDir::Write {
            return Ok(());
        }
        let (fsync_blocks, barrier_blocks, fdatasync_blocks) = {
            let w = &self.opts.workload;
            (w.fsync_blocks, w.barrier_blocks, w.fdatasync_blocks)
        };
        let fsync_every = match (fsync_blocks, barrier_blocks) {
            (0, 0) => 0,
            (a, 0) => a,
            (0, b) => b,
            (a, b) => a.min(b),
        };
        if fsync_every > 0 {
            self.blocks_since_fsync += 1;
            if self.blocks_since_fsync >= fsync_every {
                self.blocks_since_fsync = 0;
                self.issue_sync(IoOp::Fsync)?;
            }
        }
        if fdatasync_blocks > 0 {
            self.blocks_since_fdatasync += 1;
            if self.blocks_since_fdatasync >= fdatasync_blocks {
                self.blocks_since_fdatasync = 0;
                self.issue_sync(IoOp::Fdatasync)?;
            }
        }
        Ok(())
    }

    /// Issue one sync op against every open file and wait for it.
    fn issue_sync(&mut self, op: IoOp) -> Result<()> {
        for fi in 0..self.files.len() {
            if !self.files[fi].is_open() {
                continue;
            }
            let idx = self.claim_unit()?;
            {
                let unit = self.pool.unit_mut(idx);
                unit.op = op;
                unit.dir = DataDir::Write;
                unit.file_index = fi;
                unit.offset = 0;
                unit.len = 0;
            }
            self.submit_unit(idx)?;
            self.wait_for_unit(idx)?;
        }
        Ok(())
    }

    fn fsync_files(&mut self) -> Result<()> {
        self.drain_inflight()?;
        self.issue_sync(IoOp::Fsync)
    }

    /// Claim a unit, reaping until one frees up.
    fn claim_unit(&mut self) -> Result<usize> {
        loop {
            if let Some(idx) = self.pool.get(self.clock.now()) {
                return Ok(idx);
            }
            if self.pool.busy_count() == 0 {
                return Err(Error::ResourceExhausted("io unit pool"));
            }
            self.reap(1)?;
        }
    }

    /// Reap until `idx` itself completes (inline completions have already
    /// removed it from the busy list).
    fn wait_for_unit(&mut self, idx: usize) -> Result<()> {
        while self.pool.busy_units().contains(&idx) {
            if self.queued_since_commit > 0 {
                self.engine.commit()?;
                self.queued_since_commit = 0;
            }
            self.reap(1)?;
        }
        Ok(())
    }

    // ----- verification -----

    /// Verify up to `limit` recorded writes (all of them when `None`).
    fn verify_entries(&mut self, limit: Option<usize>) -> Result<()> {
        let budget = limit.unwrap_or(usize::MAX);
        for _ in 0..budget {
            if self.shared.is_terminating() {
                return Ok(());
            }
            let Some(entry) = self.history.pop() else {
                return Ok(());
            };
            self.verify_one(entry)?;
        }
        Ok(())
    }

    fn verify_one(&mut self, entry: HistoryEntry) -> Result<()> {
        let data = self.read_back(entry.file_index, entry.offset, entry.len)?;

        if let Some(pool) = &self.async_verify {
            return pool.push(VerifyJob { entry, data });
        }

        let cfg = self.verify_cfg.clone().expect("verify enabled");
        if let Err(mismatch) = verify::compare_entry(&cfg, &entry, &data) {
            log::error!(
                "worker {}: verify mismatch at offset {}: {}",
                self.id,
                mismatch.offset,
                mismatch.detail
            );
            if cfg.dump {
                let path = self.files[entry.file_index].path();
                let _ =
                    verify::dump_buffers(&cfg, path, entry.offset, &data, entry.seed, entry.serial);
            }
            let err = mismatch.into_error();
            self.stats.bump_errors();
            self.error.record(&err);
            if self.opts.verify.verify_fatal {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Synchronous engine read of one extent, via the normal unit path.
    /// Callers drain in-flight IO first, so the next completion is ours.
    fn read_back(&mut self, fi: usize, offset: u64, len: u32) -> Result<Vec<u8>> {
        let idx = self.claim_unit()?;
        {
            let unit = self.pool.unit_mut(idx);
            unit.op = IoOp::Read;
            unit.dir = DataDir::Read;
            unit.file_index = fi;
            unit.offset = offset;
            unit.len = len;
        }

        let sqe = Sqe {
            op: IoOp::Read,
            fd: self.files[fi].fd(),
            offset,
            buf: self.buffers.unit_ptr(idx),
            len: len as usize,
            unit: idx,
        };
        self.engine.prep(&sqe)?;

        let result = loop {
            match self.engine.queue(sqe)? {
                QueueResult::Completed(result) => break result,
                QueueResult::Queued => {
                    self.engine.commit()?;
                    let n = self.engine.getevents(1, 1, None)?;
                    let mut found = None;
                    for i in 0..n {
                        let cqe = self.engine.event(i);
                        if cqe.unit == idx {
                            found = Some(cqe.result);
                        }
                    }
                    break found
                        .ok_or_else(|| Error::EngineError("verify read completion lost".into()))?;
                }
                QueueResult::Busy => {
                    self.engine.commit()?;
                }
            }
        };

        let read = match result {
            Ok(n) => n,
            Err(errno) => {
                self.pool.put(idx);
                return Err(Error::from_raw_os_error(errno));
            }
        };
        if read < len as usize {
            self.pool.put(idx);
            return Err(Error::VerifyMismatch {
                offset,
                detail: format!("short read: {} of {} bytes", read, len),
            });
        }

        let data = self.buffers.unit(idx)[..len as usize].to_vec();
        self.pool.put(idx);
        Ok(data)
    }

    // ----- error policy -----

    /// Apply the failure policy: recoverable errors count and continue
    /// under continue_on_error, everything else propagates.
    fn absorb_error(&mut self, err: Error) -> Result<()> {
        self.stats.bump_errors();
        self.error.record(&err);
        if self.opts.errors.continue_on_error && err.is_recoverable() {
            log::warn!("worker {}: continuing after {}", self.id, err);
            Ok(())
        } else {
            Err(err)
        }
    }
}
