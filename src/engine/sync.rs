//! Synchronous engine: blocking pread/pwrite, the always-available baseline.
//!
//! Every `queue` call performs the IO immediately and answers `Completed`,
//! so `commit` and `getevents` are no-ops and the effective depth is 1.
//! Partial transfers are retried inside the call until the full amount
//! moves or the syscall fails. Trim maps to hole punching on Linux.

use super::{Cqe, IoEngine, IoOp, QueueResult, Sqe};
use crate::error::Result;
use std::time::Duration;

pub struct SyncEngine {
    last: Option<Cqe>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self { last: None }
    }

    fn do_read(fd: i32, buf: *mut u8, len: usize, offset: u64) -> Result<usize, i32> {
        let mut done = 0usize;
        while done < len {
            // SAFETY: the worker's buffer region outlives the call and the
            // slice bounds were checked at submission.
            let rc = unsafe {
                libc::pread(
                    fd,
                    buf.add(done) as *mut libc::c_void,
                    len - done,
                    (offset + done as u64) as libc::off_t,
                )
            };
            if rc < 0 {
                return Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
            }
            if rc == 0 {
                // EOF short read; report what arrived.
                break;
            }
            done += rc as usize;
        }
        Ok(done)
    }

    fn do_write(fd: i32, buf: *const u8, len: usize, offset: u64) -> Result<usize, i32> {
        let mut done = 0usize;
        while done < len {
            // SAFETY: as for do_read.
            let rc = unsafe {
                libc::pwrite(
                    fd,
                    buf.add(done) as *const libc::c_void,
                    len - done,
                    (offset + done as u64) as libc::off_t,
                )
            };
            if rc < 0 {
                return Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
            }
            done += rc as usize;
        }
        Ok(done)
    }

    #[cfg(target_os = "linux")]
    fn do_trim(fd: i32, offset: u64, len: usize) -> Result<usize, i32> {
        let rc = unsafe {
            libc::fallocate(
                fd,
                libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                offset as libc::off_t,
                len as libc::off_t,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
        }
        Ok(len)
    }

    #[cfg(not(target_os = "linux"))]
    fn do_trim(_fd: i32, _offset: u64, _len: usize) -> Result<usize, i32> {
        Err(libc::ENOTSUP)
    }

    #[cfg(target_os = "linux")]
    fn fdatasync_raw(fd: i32) -> libc::c_int {
        unsafe { libc::fdatasync(fd) }
    }

    #[cfg(not(target_os = "linux"))]
    fn fdatasync_raw(fd: i32) -> libc::c_int {
        unsafe { libc::fsync(fd) }
    }

    fn do_fsync(fd: i32, data_only: bool) -> Result<usize, i32> {
        let rc = if data_only {
            Self::fdatasync_raw(fd)
        } else {
            unsafe { libc::fsync(fd) }
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
        }
        Ok(0)
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IoEngine for SyncEngine {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn init(&mut self, _depth: usize) -> Result<()> {
        Ok(())
    }

    fn queue(&mut self, sqe: Sqe) -> Result<QueueResult> {
        let result = match sqe.op {
            IoOp::Read => Self::do_read(sqe.fd, sqe.buf, sqe.len, sqe.offset),
            IoOp::Write => Self::do_write(sqe.fd, sqe.buf, sqe.len, sqe.offset),
            IoOp::Trim => Self::do_trim(sqe.fd, sqe.offset, sqe.len),
            IoOp::Fsync => Self::do_fsync(sqe.fd, false),
            IoOp::Fdatasync => Self::do_fsync(sqe.fd, true),
        };
        self.last = Some(Cqe {
            unit: sqe.unit,
            op: sqe.op,
            result,
        });
        Ok(QueueResult::Completed(result))
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn getevents(&mut self, _min: usize, _max: usize, _timeout: Option<Duration>) -> Result<usize> {
        // Completions are returned inline from queue(); nothing to reap.
        Ok(0)
    }

    fn event(&self, _i: usize) -> Cqe {
        self.last.expect("no completion recorded")
    }

    fn cleanup(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_write_then_read_roundtrip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 8192]).unwrap();
        let fd = tmp.as_file().as_raw_fd();

        let mut engine = SyncEngine::new();
        engine.init(1).unwrap();

        let mut wbuf = vec![0xA5u8; 4096];
        let sqe = Sqe {
            op: IoOp::Write,
            fd,
            offset: 4096,
            buf: wbuf.as_mut_ptr(),
            len: 4096,
            unit: 7,
        };
        match engine.queue(sqe).unwrap() {
            QueueResult::Completed(Ok(n)) => assert_eq!(n, 4096),
            other => panic!("unexpected queue result: {:?}", other),
        }

        let mut rbuf = vec![0u8; 4096];
        let sqe = Sqe {
            op: IoOp::Read,
            fd,
            offset: 4096,
            buf: rbuf.as_mut_ptr(),
            len: 4096,
            unit: 8,
        };
        match engine.queue(sqe).unwrap() {
            QueueResult::Completed(Ok(n)) => assert_eq!(n, 4096),
            other => panic!("unexpected queue result: {:?}", other),
        }
        assert!(rbuf.iter().all(|&b| b == 0xA5));
        assert_eq!(engine.event(0).unit, 8);
    }

    #[test]
    fn test_read_past_eof_is_short() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[1u8; 1000]).unwrap();
        let fd = tmp.as_file().as_raw_fd();

        let mut engine = SyncEngine::new();
        let mut buf = vec![0u8; 4096];
        let sqe = Sqe {
            op: IoOp::Read,
            fd,
            offset: 0,
            buf: buf.as_mut_ptr(),
            len: 4096,
            unit: 0,
        };
        match engine.queue(sqe).unwrap() {
            QueueResult::Completed(Ok(n)) => assert_eq!(n, 1000),
            other => panic!("unexpected queue result: {:?}", other),
        }
    }

    #[test]
    fn test_bad_fd_reports_errno() {
        let mut engine = SyncEngine::new();
        let mut buf = vec![0u8; 512];
        let sqe = Sqe {
            op: IoOp::Write,
            fd: -1,
            offset: 0,
            buf: buf.as_mut_ptr(),
            len: 512,
            unit: 0,
        };
        match engine.queue(sqe).unwrap() {
            QueueResult::Completed(Err(errno)) => assert_eq!(errno, libc::EBADF),
            other => panic!("unexpected queue result: {:?}", other),
        }
    }

    #[test]
    fn test_fsync() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let fd = tmp.as_file().as_raw_fd();
        let mut engine = SyncEngine::new();
        let sqe = Sqe {
            op: IoOp::Fsync,
            fd,
            offset: 0,
            buf: std::ptr::null_mut(),
            len: 0,
            unit: 0,
        };
        assert!(matches!(
            engine.queue(sqe).unwrap(),
            QueueResult::Completed(Ok(0))
        ));
    }
}
