//! Mock engine for tests.
//!
//! Emulates an async engine against an in-memory backing store: `queue`
//! accepts descriptors (optionally answering `Busy` on a schedule), `commit`
//! executes them, and `getevents` reaps. With a backing store attached,
//! reads and writes move real bytes, so verification paths can be exercised
//! end to end without touching a filesystem; trims zero the range. Failures
//! can be injected for any scheduled operation.

use super::{Cqe, IoEngine, IoOp, QueueResult, Sqe};
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Record of one submitted operation, for test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpRecord {
    pub op: IoOp,
    pub offset: u64,
    pub len: usize,
    pub unit: usize,
}

pub struct MockEngine {
    queued: Vec<Sqe>,
    committed: VecDeque<Cqe>,
    events: Vec<Cqe>,
    backing: Option<Arc<Mutex<Vec<u8>>>>,
    submitted: Arc<Mutex<Vec<OpRecord>>>,
    ops_seen: u64,
    /// Fail the nth executed op (1-based) with this errno.
    fail_on: Option<(u64, i32)>,
    /// Answer Busy on every nth queue call (1-based cadence).
    busy_every: Option<u64>,
    queue_calls: u64,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            queued: Vec::new(),
            committed: VecDeque::new(),
            events: Vec::new(),
            backing: None,
            submitted: Arc::new(Mutex::new(Vec::new())),
            ops_seen: 0,
            fail_on: None,
            busy_every: None,
            queue_calls: 0,
        }
    }

    /// Attach an in-memory target of `size` bytes, shared so tests can
    /// inspect or corrupt it while the engine holds it.
    pub fn with_backing(mut self, size: usize) -> Self {
        self.backing = Some(Arc::new(Mutex::new(vec![0u8; size])));
        self
    }

    pub fn backing(&self) -> Option<Arc<Mutex<Vec<u8>>>> {
        self.backing.clone()
    }

    /// Fail the `nth` executed operation (1-based) with `errno`.
    pub fn fail_on(mut self, nth: u64, errno: i32) -> Self {
        self.fail_on = Some((nth, errno));
        self
    }

    /// Answer `Busy` to every `nth` queue call.
    pub fn busy_every(mut self, nth: u64) -> Self {
        self.busy_every = Some(nth.max(2));
        self
    }

    /// Shared handle to the submission records; stays readable after the
    /// engine moves into a worker.
    pub fn records(&self) -> Arc<Mutex<Vec<OpRecord>>> {
        self.submitted.clone()
    }

    pub fn submitted_ops(&self) -> Vec<OpRecord> {
        self.submitted.lock().unwrap().clone()
    }

    fn execute(&mut self, sqe: Sqe) -> Cqe {
        self.ops_seen += 1;
        if let Some((nth, errno)) = self.fail_on {
            if self.ops_seen == nth {
                return Cqe {
                    unit: sqe.unit,
                    op: sqe.op,
                    result: Err(errno),
                };
            }
        }

        let result = match (&self.backing, sqe.op) {
            (Some(mem), IoOp::Read) => {
                let mem = mem.lock().unwrap();
                let end = (sqe.offset as usize + sqe.len).min(mem.len());
                let n = end.saturating_sub(sqe.offset as usize);
                // SAFETY: the caller's buffer covers sqe.len bytes.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        mem.as_ptr().add(sqe.offset as usize),
                        sqe.buf,
                        n,
                    );
                }
                Ok(n)
            }
            (Some(mem), IoOp::Write) => {
                let mut mem = mem.lock().unwrap();
                let end = (sqe.offset as usize + sqe.len).min(mem.len());
                let n = end.saturating_sub(sqe.offset as usize);
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        sqe.buf,
                        mem.as_mut_ptr().add(sqe.offset as usize),
                        n,
                    );
                }
                Ok(n)
            }
            (Some(mem), IoOp::Trim) => {
                let mut mem = mem.lock().unwrap();
                let end = (sqe.offset as usize + sqe.len).min(mem.len());
                let start = (sqe.offset as usize).min(end);
                mem[start..end].fill(0);
                Ok(sqe.len)
            }
            (_, IoOp::Fsync | IoOp::Fdatasync) => Ok(0),
            // No backing store: transfers succeed without moving bytes.
            (None, _) => Ok(sqe.len),
        };

        Cqe {
            unit: sqe.unit,
            op: sqe.op,
            result,
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IoEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn init(&mut self, _depth: usize) -> Result<()> {
        Ok(())
    }

    fn queue(&mut self, sqe: Sqe) -> Result<QueueResult> {
        self.queue_calls += 1;
        if let Some(nth) = self.busy_every {
            if self.queue_calls % nth == 0 {
                return Ok(QueueResult::Busy);
            }
        }
        self.submitted.lock().unwrap().push(OpRecord {
            op: sqe.op,
            offset: sqe.offset,
            len: sqe.len,
            unit: sqe.unit,
        });
        self.queued.push(sqe);
        Ok(QueueResult::Queued)
    }

    fn commit(&mut self) -> Result<()> {
        let queued: Vec<Sqe> = self.queued.drain(..).collect();
        for sqe in queued {
            let cqe = self.execute(sqe);
            self.committed.push_back(cqe);
        }
        Ok(())
    }

    fn getevents(&mut self, min: usize, max: usize, _timeout: Option<Duration>) -> Result<usize> {
        // Implicit commit, like a kernel reaping submitted-but-unflushed work.
        self.commit()?;
        self.events.clear();
        let want = max.max(min).max(1);
        while self.events.len() < want {
            match self.committed.pop_front() {
                Some(cqe) => self.events.push(cqe),
                None => break,
            }
        }
        Ok(self.events.len())
    }

    fn event(&self, i: usize) -> Cqe {
        self.events[i]
    }

    fn cancel(&mut self, unit: usize) -> Result<()> {
        // Drop the unit from the pending queues as if the kernel gave it up.
        self.queued.retain(|sqe| sqe.unit != unit);
        self.committed.retain(|cqe| cqe.unit != unit);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.queued.clear();
        self.committed.clear();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqe(op: IoOp, offset: u64, buf: *mut u8, len: usize, unit: usize) -> Sqe {
        Sqe {
            op,
            fd: 0,
            offset,
            buf,
            len,
            unit,
        }
    }

    #[test]
    fn test_write_read_roundtrip_through_backing() {
        let mut engine = MockEngine::new().with_backing(16 * 1024);
        engine.init(4).unwrap();

        let mut wbuf = vec![0x5Au8; 4096];
        engine
            .queue(sqe(IoOp::Write, 8192, wbuf.as_mut_ptr(), 4096, 1))
            .unwrap();
        engine.commit().unwrap();
        assert_eq!(engine.getevents(1, 1, None).unwrap(), 1);
        assert!(matches!(engine.event(0).result, Ok(4096)));

        let mut rbuf = vec![0u8; 4096];
        engine
            .queue(sqe(IoOp::Read, 8192, rbuf.as_mut_ptr(), 4096, 2))
            .unwrap();
        assert_eq!(engine.getevents(1, 1, None).unwrap(), 1);
        assert!(rbuf.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_trim_zeroes_range() {
        let mut engine = MockEngine::new().with_backing(8192);
        let mut wbuf = vec![0xFFu8; 8192];
        engine
            .queue(sqe(IoOp::Write, 0, wbuf.as_mut_ptr(), 8192, 1))
            .unwrap();
        engine
            .queue(sqe(IoOp::Trim, 4096, std::ptr::null_mut(), 4096, 2))
            .unwrap();
        assert_eq!(engine.getevents(2, 2, None).unwrap(), 2);

        let mem = engine.backing().unwrap();
        let mem = mem.lock().unwrap();
        assert!(mem[..4096].iter().all(|&b| b == 0xFF));
        assert!(mem[4096..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fail_injection() {
        let mut engine = MockEngine::new().with_backing(4096).fail_on(2, libc::EIO);
        let mut buf = vec![0u8; 512];
        engine.queue(sqe(IoOp::Write, 0, buf.as_mut_ptr(), 512, 1)).unwrap();
        engine.queue(sqe(IoOp::Write, 512, buf.as_mut_ptr(), 512, 2)).unwrap();
        assert_eq!(engine.getevents(2, 2, None).unwrap(), 2);
        assert!(engine.event(0).result.is_ok());
        assert_eq!(engine.event(1).result, Err(libc::EIO));
    }

    #[test]
    fn test_busy_then_retry() {
        let mut engine = MockEngine::new().with_backing(4096).busy_every(2);
        let mut buf = vec![0u8; 512];
        assert!(matches!(
            engine.queue(sqe(IoOp::Write, 0, buf.as_mut_ptr(), 512, 1)).unwrap(),
            QueueResult::Queued
        ));
        assert!(matches!(
            engine.queue(sqe(IoOp::Write, 512, buf.as_mut_ptr(), 512, 2)).unwrap(),
            QueueResult::Busy
        ));
        // Retry after the busy answer succeeds.
        assert!(matches!(
            engine.queue(sqe(IoOp::Write, 512, buf.as_mut_ptr(), 512, 2)).unwrap(),
            QueueResult::Queued
        ));
    }

    #[test]
    fn test_reap_respects_max() {
        let mut engine = MockEngine::new().with_backing(8192);
        let mut buf = vec![0u8; 512];
        for i in 0..4 {
            engine
                .queue(sqe(IoOp::Write, i * 512, buf.as_mut_ptr(), 512, i as usize))
                .unwrap();
        }
        assert_eq!(engine.getevents(1, 2, None).unwrap(), 2);
        assert_eq!(engine.getevents(1, 4, None).unwrap(), 2);
    }

    #[test]
    fn test_short_read_past_backing_end() {
        let mut engine = MockEngine::new().with_backing(1000);
        let mut buf = vec![0u8; 4096];
        engine.queue(sqe(IoOp::Read, 0, buf.as_mut_ptr(), 4096, 1)).unwrap();
        engine.getevents(1, 1, None).unwrap();
        assert_eq!(engine.event(0).result, Ok(1000));
    }
}
