//! Error taxonomy shared by workers, engines, and the supervisor.
//!
//! Every worker owns one [`ErrorSlot`]: the first error recorded wins, later
//! errors only bump the counter. IO errors carrying EIO or EILSEQ are
//! recoverable when `continue_on_error` is set; everything else ends the
//! worker.

use std::io;

/// Crate-wide result type carrying the typed error taxonomy.
///
/// The binary layer wraps this in `anyhow` for context chains; the core
/// modules stay typed so policy decisions (fatal vs recoverable) can be made
/// on the error itself.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Maximum length of the formatted message kept in a worker's error slot.
pub const ERROR_MSG_MAX: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("io failed: {source}")]
    IoFailed {
        #[from]
        source: io::Error,
    },

    #[error("verify mismatch at offset {offset}: {detail}")]
    VerifyMismatch { offset: u64, detail: String },

    #[error("rate below minimum: {dir} measured {measured}/s, floor {floor}/s")]
    RateTooLow {
        dir: &'static str,
        measured: u64,
        floor: u64,
    },

    #[error("timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("engine error: {0}")]
    EngineError(String),
}

/// Discriminant used for reporting and test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigInvalid,
    ResourceExhausted,
    IoFailed,
    VerifyMismatch,
    RateTooLow,
    Timeout,
    Cancelled,
    EngineError,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::IoFailed { .. } => ErrorKind::IoFailed,
            Error::VerifyMismatch { .. } => ErrorKind::VerifyMismatch,
            Error::RateTooLow { .. } => ErrorKind::RateTooLow,
            Error::Timeout => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::EngineError(_) => ErrorKind::EngineError,
        }
    }

    /// Raw errno for IO failures, if the underlying error carried one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::IoFailed { source } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Recoverable errors update counters without ending the worker when
    /// `continue_on_error` is set. Only EIO and EILSEQ qualify.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.errno(), Some(libc::EIO) | Some(libc::EILSEQ))
    }

    pub fn from_raw_os_error(errno: i32) -> Self {
        Error::IoFailed {
            source: io::Error::from_raw_os_error(errno),
        }
    }
}

/// First-error-wins slot with a monotonic error counter.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    first: Option<(ErrorKind, Option<i32>, String)>,
    count: u64,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. The first one is kept (kind, errno, message truncated
    /// to [`ERROR_MSG_MAX`] bytes); every call increments the counter.
    pub fn record(&mut self, err: &Error) {
        self.count += 1;
        if self.first.is_none() {
            let mut msg = err.to_string();
            if msg.len() > ERROR_MSG_MAX {
                // Truncate on a char boundary.
                let mut end = ERROR_MSG_MAX;
                while !msg.is_char_boundary(end) {
                    end -= 1;
                }
                msg.truncate(end);
            }
            self.first = Some((err.kind(), err.errno(), msg));
        }
    }

    pub fn first_kind(&self) -> Option<ErrorKind> {
        self.first.as_ref().map(|(k, _, _)| *k)
    }

    pub fn first_errno(&self) -> Option<i32> {
        self.first.as_ref().and_then(|(_, e, _)| *e)
    }

    pub fn first_message(&self) -> Option<&str> {
        self.first.as_ref().map(|(_, _, m)| m.as_str())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_set(&self) -> bool {
        self.first.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let eio = Error::from_raw_os_error(libc::EIO);
        let eilseq = Error::from_raw_os_error(libc::EILSEQ);
        let enospc = Error::from_raw_os_error(libc::ENOSPC);

        assert!(eio.is_recoverable());
        assert!(eilseq.is_recoverable());
        assert!(!enospc.is_recoverable());
        assert!(!Error::Timeout.is_recoverable());
    }

    #[test]
    fn test_slot_first_error_wins() {
        let mut slot = ErrorSlot::new();
        slot.record(&Error::from_raw_os_error(libc::EIO));
        slot.record(&Error::Timeout);
        slot.record(&Error::Cancelled);

        assert_eq!(slot.first_kind(), Some(ErrorKind::IoFailed));
        assert_eq!(slot.first_errno(), Some(libc::EIO));
        assert_eq!(slot.count(), 3);
    }

    #[test]
    fn test_slot_message_truncated() {
        let mut slot = ErrorSlot::new();
        slot.record(&Error::ConfigInvalid("x".repeat(500)));
        assert!(slot.first_message().unwrap().len() <= ERROR_MSG_MAX);
    }

    #[test]
    fn test_slot_empty() {
        let slot = ErrorSlot::new();
        assert!(!slot.is_set());
        assert_eq!(slot.count(), 0);
        assert_eq!(slot.first_kind(), None);
    }
}
