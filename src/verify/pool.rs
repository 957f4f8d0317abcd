//! Async verify offload.
//!
//! With `verify_async`, read-back data is handed to a pool of verifier
//! threads over a bounded channel instead of being compared inline. The
//! channel capacity is `verify_backlog`: once that many unverified blocks
//! accumulate, the submitting worker blocks until the pool drains. Threads
//! pull work in `verify_batch` chunks. A mismatch lands in the shared sink;
//! with `verify_fatal` it also raises the worker's terminate flag, and the
//! pool drains the remaining jobs without comparing.

use crate::error::Error;
use crate::verify::history::HistoryEntry;
use crate::verify::{compare_entry, dump_buffers, VerifyConfig};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// One block of read-back data awaiting comparison.
#[derive(Debug)]
pub struct VerifyJob {
    pub entry: HistoryEntry,
    pub data: Vec<u8>,
}

/// Shared mismatch accounting. The first error wins; the counter keeps
/// going.
#[derive(Debug, Default)]
pub struct VerifySink {
    mismatches: AtomicU64,
    first: Mutex<Option<Error>>,
}

impl VerifySink {
    pub fn record(&self, err: Error) {
        self.mismatches.fetch_add(1, Ordering::Relaxed);
        let mut first = self.first.lock().expect("sink lock poisoned");
        if first.is_none() {
            *first = Some(err);
        }
    }

    pub fn mismatches(&self) -> u64 {
        self.mismatches.load(Ordering::Relaxed)
    }

    pub fn take_first(&self) -> Option<Error> {
        self.first.lock().expect("sink lock poisoned").take()
    }
}

pub struct AsyncVerifier {
    tx: Option<Sender<VerifyJob>>,
    threads: Vec<JoinHandle<()>>,
    sink: Arc<VerifySink>,
}

impl AsyncVerifier {
    /// Start `nr_threads` verifier threads.
    ///
    /// `paths` maps `HistoryEntry::file_index` to the data file path for
    /// `verify_dump`. `terminate` is the worker's flag: fatal mismatches
    /// raise it, and a raised flag makes the pool drain without comparing.
    pub fn spawn(
        cfg: VerifyConfig,
        paths: Arc<Vec<PathBuf>>,
        nr_threads: usize,
        backlog: usize,
        batch: usize,
        fatal: bool,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        let (tx, rx) = bounded::<VerifyJob>(backlog.max(1));
        let sink = Arc::new(VerifySink::default());
        let batch = batch.max(1);

        let threads = (0..nr_threads.max(1))
            .map(|_| {
                let rx = rx.clone();
                let cfg = cfg.clone();
                let paths = paths.clone();
                let sink = sink.clone();
                let terminate = terminate.clone();
                std::thread::spawn(move || {
                    verifier_loop(rx, cfg, paths, sink, fatal, terminate, batch)
                })
            })
            .collect();

        Self {
            tx: Some(tx),
            threads,
            sink,
        }
    }

    /// Hand one job to the pool, blocking while the backlog is full.
    /// An error means the pool is gone and the caller should stop.
    pub fn push(&self, job: VerifyJob) -> Result<(), Error> {
        match self.tx.as_ref().expect("pool finished").send(job) {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::Cancelled),
        }
    }

    pub fn sink(&self) -> &Arc<VerifySink> {
        &self.sink
    }

    /// Close the queue, wait for the drain, and report
    /// `(mismatch count, first error)`.
    pub fn finish(mut self) -> (u64, Option<Error>) {
        self.tx = None;
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        (self.sink.mismatches(), self.sink.take_first())
    }
}

fn verifier_loop(
    rx: Receiver<VerifyJob>,
    cfg: VerifyConfig,
    paths: Arc<Vec<PathBuf>>,
    sink: Arc<VerifySink>,
    fatal: bool,
    terminate: Arc<AtomicBool>,
    batch: usize,
) {
    let mut jobs = Vec::with_capacity(batch);
    while let Ok(first) = rx.recv() {
        jobs.push(first);
        while jobs.len() < batch {
            match rx.try_recv() {
                Ok(job) => jobs.push(job),
                Err(_) => break,
            }
        }
        for job in jobs.drain(..) {
            // Once termination is raised, keep draining so the submitter
            // never wedges on a full channel, but stop comparing.
            if terminate.load(Ordering::Relaxed) {
                continue;
            }
            if let Err(mismatch) = compare_entry(&cfg, &job.entry, &job.data) {
                log::error!(
                    "verify mismatch at offset {}: {}",
                    mismatch.offset,
                    mismatch.detail
                );
                if cfg.dump {
                    if let Some(path) = paths.get(job.entry.file_index) {
                        let _ = dump_buffers(
                            &cfg,
                            path,
                            job.entry.offset,
                            &job.data,
                            job.entry.seed,
                            job.entry.serial,
                        );
                    }
                }
                sink.record(mismatch.into_error());
                if fatal {
                    terminate.store(true, Ordering::Relaxed);
                }
            }
        }
    }
}
