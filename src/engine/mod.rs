//! IO engine abstraction.
//!
//! An engine owns the mechanics of moving a request to the kernel and
//! getting a completion back; the worker only ever speaks this contract.
//! Submission is two-phase: `queue` hands over a descriptor (synchronous
//! engines complete it on the spot), `commit` flushes whatever the engine
//! has batched, and `getevents`/`event` reap completions. A `Busy` answer
//! from `queue` tells the worker to commit and retry.
//!
//! Engines are discovered by name through [`create`]: `sync` (pread/pwrite
//! baseline, always available), `mock` (deterministic in-memory engine for
//! tests), and `io_uring` behind the cargo feature of the same name.

use crate::config::workload::EngineKind;
use crate::error::Result;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Operation carried by a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
    Trim,
    Fsync,
    Fdatasync,
}

impl IoOp {
    /// Whether the operation transfers payload through a buffer.
    pub fn has_buffer(self) -> bool {
        matches!(self, IoOp::Read | IoOp::Write)
    }
}

impl std::fmt::Display for IoOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoOp::Read => write!(f, "read"),
            IoOp::Write => write!(f, "write"),
            IoOp::Trim => write!(f, "trim"),
            IoOp::Fsync => write!(f, "fsync"),
            IoOp::Fdatasync => write!(f, "fdatasync"),
        }
    }
}

/// Submission descriptor.
///
/// `unit` is opaque to the engine and comes back in the matching [`Cqe`];
/// the worker stores the IO unit index there.
///
/// # Safety
///
/// `buf` must stay valid and unmoved until the completion for `unit` has
/// been reaped. The per-worker buffer region guarantees this.
#[derive(Debug, Clone, Copy)]
pub struct Sqe {
    pub op: IoOp,
    pub fd: RawFd,
    pub offset: u64,
    pub buf: *mut u8,
    pub len: usize,
    pub unit: usize,
}

// Raw pointer aside, submissions never cross threads: each worker owns its
// engine.
unsafe impl Send for Sqe {}

/// Completion record.
#[derive(Debug, Clone, Copy)]
pub struct Cqe {
    pub unit: usize,
    pub op: IoOp,
    /// Bytes transferred, or the failing errno.
    pub result: Result<usize, i32>,
}

/// Answer from [`IoEngine::queue`].
#[derive(Debug, Clone, Copy)]
pub enum QueueResult {
    /// Accepted; a completion will surface via `getevents`.
    Queued,
    /// Synchronous engines finish the IO inside `queue`.
    Completed(Result<usize, i32>),
    /// Submission side is full: commit, reap, retry.
    Busy,
}

/// The pluggable engine contract.
pub trait IoEngine: Send {
    fn name(&self) -> &'static str;

    /// Called once before any IO, with the configured queue depth.
    fn init(&mut self, depth: usize) -> Result<()>;

    /// Engine-specific preflight for one submission. Most engines need
    /// nothing here.
    fn prep(&mut self, _sqe: &Sqe) -> Result<()> {
        Ok(())
    }

    /// Hand one descriptor to the engine.
    fn queue(&mut self, sqe: Sqe) -> Result<QueueResult>;

    /// Flush queued submissions to the kernel.
    fn commit(&mut self) -> Result<()>;

    /// Reap at least `min` and at most `max` completions, blocking up to
    /// `timeout` (forever if `None`). Returns the number reaped, retrievable
    /// through [`IoEngine::event`].
    fn getevents(&mut self, min: usize, max: usize, timeout: Option<Duration>) -> Result<usize>;

    /// The i-th completion from the last `getevents` call.
    fn event(&self, i: usize) -> Cqe;

    /// Best-effort cancel of an in-flight unit.
    fn cancel(&mut self, _unit: usize) -> Result<()> {
        Ok(())
    }

    /// Release engine resources; the engine is unusable afterwards.
    fn cleanup(&mut self) {}
}

pub mod sync;

pub mod mock;

#[cfg(feature = "io_uring")]
pub mod io_uring;

/// Instantiate an engine by name.
pub fn create(kind: EngineKind) -> Result<Box<dyn IoEngine>> {
    match kind {
        EngineKind::Sync => Ok(Box::new(sync::SyncEngine::new())),
        EngineKind::Mock => Ok(Box::new(mock::MockEngine::new())),
        #[cfg(feature = "io_uring")]
        EngineKind::IoUring => Ok(Box::new(io_uring::IoUringEngine::new())),
        #[cfg(not(feature = "io_uring"))]
        EngineKind::IoUring => Err(crate::error::Error::EngineError(
            "io_uring engine not built in (enable the io_uring feature)".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_by_name() {
        assert_eq!(create(EngineKind::Sync).unwrap().name(), "sync");
        assert_eq!(create(EngineKind::Mock).unwrap().name(), "mock");
    }

    #[test]
    fn test_op_buffer_classification() {
        assert!(IoOp::Read.has_buffer());
        assert!(IoOp::Write.has_buffer());
        assert!(!IoOp::Trim.has_buffer());
        assert!(!IoOp::Fsync.has_buffer());
    }
}
