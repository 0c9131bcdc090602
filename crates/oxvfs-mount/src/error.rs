//! Error taxonomy and the engine result translator.
//!
//! Engine calls return `>= 0` on success and `-errno` on failure. [`check`] is
//! the only place that sign is interpreted; everything above it sees
//! [`VfsError`].

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised by the session manager and the POSIX layer.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Malformed input caught before touching the engine.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Operation invoked in the wrong session state.
    #[error("illegal state: {message}")]
    IllegalState { message: String },

    /// Engine or host failure with its errno.
    #[error("{operation} failed: {errno}")]
    Errno {
        errno: Errno,
        operation: &'static str,
        #[source]
        cause: Option<Box<VfsError>>,
    },

    /// Operation intentionally left unimplemented.
    #[error("{operation} is not implemented")]
    NotImplemented { operation: &'static str },
}

pub type VfsResult<T> = Result<T, VfsError>;

impl VfsError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    pub fn errno(operation: &'static str, errno: Errno) -> Self {
        Self::Errno {
            errno,
            operation,
            cause: None,
        }
    }

    /// Attach `cause` to an errno error. Other variants carry no cause and
    /// are returned unchanged.
    #[must_use]
    pub fn with_cause(self, cause: VfsError) -> Self {
        match self {
            Self::Errno {
                errno, operation, ..
            } => Self::Errno {
                errno,
                operation,
                cause: Some(Box::new(cause)),
            },
            other => other,
        }
    }

    /// The POSIX errno this error stands for.
    pub fn to_errno(&self) -> Errno {
        match self {
            Self::InvalidArgument { .. } => Errno::EINVAL,
            // "Device not configured": nothing is mounted
            Self::IllegalState { .. } => Errno::ENXIO,
            Self::Errno { errno, .. } => *errno,
            Self::NotImplemented { .. } => Errno::ENOSYS,
        }
    }

    /// Whether this is an engine/host failure with exactly `errno`.
    pub fn is_errno(&self, errno: Errno) -> bool {
        matches!(self, Self::Errno { errno: e, .. } if *e == errno)
    }

    /// The chained cause, if any.
    pub fn cause(&self) -> Option<&VfsError> {
        match self {
            Self::Errno { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}

impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Errno { errno, .. } => io::Error::from_raw_os_error(errno as i32),
            VfsError::InvalidArgument { .. } => io::Error::new(io::ErrorKind::InvalidInput, e),
            VfsError::IllegalState { .. } => io::Error::new(io::ErrorKind::NotConnected, e),
            VfsError::NotImplemented { .. } => io::Error::new(io::ErrorKind::Unsupported, e),
        }
    }
}

/// Translate an engine result code.
pub fn check(operation: &'static str, rc: impl Into<i64>) -> VfsResult<u64> {
    let rc = rc.into();
    if rc >= 0 {
        Ok(rc as u64)
    } else {
        Err(VfsError::errno(operation, Errno::from_raw((-rc) as i32)))
    }
}

/// Human-readable description of an errno.
pub fn strerror(errno: i32) -> String {
    Errno::from_raw(errno).desc().to_string()
}

/// Caller-side pending error.
///
/// At most one error is outstanding: raising a new one consumes the pending
/// error as its cause.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    pending: Option<VfsError>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an error to be chained onto the next one raised. A previously
    /// parked error becomes the cause of the new one.
    pub fn set_pending(&mut self, error: VfsError) {
        self.pending = Some(match self.pending.take() {
            Some(older) => error.with_cause(older),
            None => error,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn take(&mut self) -> Option<VfsError> {
        self.pending.take()
    }

    /// Build a new errno error, consuming the pending error as its cause.
    pub fn raise(&mut self, operation: &'static str, errno: Errno) -> VfsError {
        self.chain(VfsError::errno(operation, errno))
    }

    /// [`check`], chaining the pending error onto a failure.
    pub fn check(&mut self, operation: &'static str, rc: impl Into<i64>) -> VfsResult<u64> {
        check(operation, rc).map_err(|e| self.chain(e))
    }

    fn chain(&mut self, error: VfsError) -> VfsError {
        match self.pending.take() {
            Some(cause) => error.with_cause(cause),
            None => error,
        }
    }
}
