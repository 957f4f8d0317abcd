//! io_uring engine (Linux 5.1+, behind the `io_uring` cargo feature).
//!
//! Queued descriptors land in the submission ring and go to the kernel in
//! batches on `commit`; a full submission queue surfaces as `Busy` so the
//! worker commits and retries. Trim is expressed as a hole-punching
//! fallocate, matching the sync engine's behavior.

use super::{Cqe, IoEngine, IoOp, QueueResult, Sqe};
use crate::error::{Error, Result};
use io_uring::{opcode, types, IoUring};
use std::collections::HashMap;
use std::time::Duration;

/// user_data tag for cancel submissions; never collides with unit indices.
const CANCEL_TAG: u64 = u64::MAX;

pub struct IoUringEngine {
    ring: Option<IoUring>,
    /// unit -> op for completions in flight.
    ops: HashMap<u64, IoOp>,
    events: Vec<Cqe>,
    queued: usize,
}

impl IoUringEngine {
    pub fn new() -> Self {
        Self {
            ring: None,
            ops: HashMap::new(),
            events: Vec::new(),
            queued: 0,
        }
    }

    fn ring(&mut self) -> Result<&mut IoUring> {
        self.ring
            .as_mut()
            .ok_or_else(|| Error::EngineError("io_uring engine not initialized".into()))
    }

    fn build_entry(sqe: &Sqe) -> io_uring::squeue::Entry {
        match sqe.op {
            IoOp::Read => opcode::Read::new(types::Fd(sqe.fd), sqe.buf, sqe.len as u32)
                .offset(sqe.offset as _)
                .build()
                .user_data(sqe.unit as u64),
            IoOp::Write => {
                opcode::Write::new(types::Fd(sqe.fd), sqe.buf as *const u8, sqe.len as u32)
                    .offset(sqe.offset as _)
                    .build()
                    .user_data(sqe.unit as u64)
            }
            IoOp::Trim => opcode::Fallocate::new(types::Fd(sqe.fd), sqe.len as _)
                .offset(sqe.offset as _)
                .mode(libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE)
                .build()
                .user_data(sqe.unit as u64),
            IoOp::Fsync => opcode::Fsync::new(types::Fd(sqe.fd))
                .build()
                .user_data(sqe.unit as u64),
            IoOp::Fdatasync => opcode::Fsync::new(types::Fd(sqe.fd))
                .flags(types::FsyncFlags::DATASYNC)
                .build()
                .user_data(sqe.unit as u64),
        }
    }

    /// Move everything currently in the completion ring into `events`,
    /// dropping cancel acknowledgements.
    fn drain_completions(&mut self, max: usize) {
        let ring = match self.ring.as_mut() {
            Some(ring) => ring,
            None => return,
        };
        for cqe in ring.completion() {
            let user_data = cqe.user_data();
            if user_data == CANCEL_TAG {
                continue;
            }
            let op = self
                .ops
                .remove(&user_data)
                .unwrap_or(IoOp::Read);
            let res = cqe.result();
            let result = if res >= 0 {
                Ok(res as usize)
            } else {
                Err(-res)
            };
            self.events.push(Cqe {
                unit: user_data as usize,
                op,
                result,
            });
            if self.events.len() >= max {
                break;
            }
        }
    }
}

impl Default for IoUringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IoEngine for IoUringEngine {
    fn name(&self) -> &'static str {
        "io_uring"
    }

    fn init(&mut self, depth: usize) -> Result<()> {
        let entries = (depth.max(1) as u32).next_power_of_two();
        let ring = IoUring::new(entries)
            .map_err(|e| Error::EngineError(format!("io_uring setup failed: {}", e)))?;
        self.ring = Some(ring);
        Ok(())
    }

    fn queue(&mut self, sqe: Sqe) -> Result<QueueResult> {
        let entry = Self::build_entry(&sqe);
        let ring = self.ring()?;
        // SAFETY: the buffer referenced by the entry lives in the worker's
        // pinned region until the completion is reaped.
        let pushed = unsafe { ring.submission().push(&entry).is_ok() };
        if !pushed {
            return Ok(QueueResult::Busy);
        }
        self.ops.insert(sqe.unit as u64, sqe.op);
        self.queued += 1;
        Ok(QueueResult::Queued)
    }

    fn commit(&mut self) -> Result<()> {
        if self.queued == 0 {
            return Ok(());
        }
        let ring = self.ring()?;
        ring.submit()
            .map_err(|e| Error::EngineError(format!("io_uring submit failed: {}", e)))?;
        self.queued = 0;
        Ok(())
    }

    fn getevents(&mut self, min: usize, max: usize, _timeout: Option<Duration>) -> Result<usize> {
        self.commit()?;
        self.events.clear();
        let max = max.max(min).max(1);

        self.drain_completions(max);
        while self.events.len() < min {
            let ring = self.ring()?;
            ring.submit_and_wait(1)
                .map_err(|e| Error::EngineError(format!("io_uring wait failed: {}", e)))?;
            self.drain_completions(max);
        }
        Ok(self.events.len())
    }

    fn event(&self, i: usize) -> Cqe {
        self.events[i]
    }

    fn cancel(&mut self, unit: usize) -> Result<()> {
        let ring = self.ring()?;
        let entry = opcode::AsyncCancel::new(unit as u64)
            .build()
            .user_data(CANCEL_TAG);
        // Best effort: a full submission queue just means the IO completes
        // normally.
        let pushed = unsafe { ring.submission().push(&entry).is_ok() };
        if pushed {
            let _ = ring.submit();
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        // Reap whatever is still in flight so buffers are quiescent before
        // the region is torn down.
        if let Some(ring) = self.ring.as_mut() {
            let _ = ring.submit();
            while !self.ops.is_empty() {
                if ring.submit_and_wait(1).is_err() {
                    break;
                }
                let mut reaped = Vec::new();
                for cqe in ring.completion() {
                    reaped.push(cqe.user_data());
                }
                for user_data in reaped {
                    self.ops.remove(&user_data);
                }
            }
        }
        self.ring = None;
        self.ops.clear();
        self.events.clear();
        self.queued = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::io::AsRawFd;

    fn uring_available() -> bool {
        IoUring::new(2).is_ok()
    }

    #[test]
    fn test_queue_commit_reap_roundtrip() {
        if !uring_available() {
            return;
        }
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0xABu8; 8192]).unwrap();
        tmp.flush().unwrap();
        let fd = tmp.as_file().as_raw_fd();

        let mut engine = IoUringEngine::new();
        engine.init(4).unwrap();

        let mut buf = vec![0u8; 4096];
        let sqe = Sqe {
            op: IoOp::Read,
            fd,
            offset: 4096,
            buf: buf.as_mut_ptr(),
            len: 4096,
            unit: 3,
        };
        assert!(matches!(engine.queue(sqe).unwrap(), QueueResult::Queued));
        engine.commit().unwrap();
        let n = engine.getevents(1, 4, None).unwrap();
        assert_eq!(n, 1);
        let cqe = engine.event(0);
        assert_eq!(cqe.unit, 3);
        assert_eq!(cqe.result, Ok(4096));
        assert!(buf.iter().all(|&b| b == 0xAB));
        engine.cleanup();
    }

    #[test]
    fn test_error_surfaces_errno() {
        if !uring_available() {
            return;
        }
        let mut engine = IoUringEngine::new();
        engine.init(2).unwrap();
        let mut buf = vec![0u8; 512];
        let sqe = Sqe {
            op: IoOp::Read,
            fd: -1,
            offset: 0,
            buf: buf.as_mut_ptr(),
            len: 512,
            unit: 0,
        };
        engine.queue(sqe).unwrap();
        engine.getevents(1, 1, None).unwrap();
        assert_eq!(engine.event(0).result, Err(libc::EBADF));
        engine.cleanup();
    }
}
