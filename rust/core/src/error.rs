//! Error types for mapped-region operations

use nix::errno::Errno;
use thiserror::Error;

/// Mapped-region error types
///
/// Every variant that comes back from the kernel carries the raw `errno`
/// so callers can make their own retry decisions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    /// Creating the mapping failed
    #[error("Mapping failed: {0}")]
    Mapping(Errno),

    /// Releasing the mapping failed
    #[error("Unmap failed: {0}")]
    Unmap(Errno),

    /// Flushing to the backing store failed
    #[error("Sync failed: {0}")]
    Sync(Errno),

    /// Advice rejected by the kernel
    #[error("Advise failed: {0}")]
    Advise(Errno),

    /// Locking pages failed (privilege or locked-memory limit)
    #[error("Memory lock failed: {0}")]
    Resource(Errno),

    /// Protection change rejected
    #[error("Protection change failed: {0}")]
    Protect(Errno),

    /// Residency query failed
    #[error("Residency query failed: {0}")]
    Query(Errno),

    /// A platform-namespaced value was requested on another platform
    #[error("{what} is not supported on {platform} ({op:?})")]
    Unsupported {
        op: ErrorKind,
        what: &'static str,
        platform: &'static str,
    },
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, MmapError>;

/// Operation family an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Mapping,
    Unmap,
    Sync,
    Advise,
    Resource,
    Protect,
    Query,
}

impl MmapError {
    /// Wrap a kernel error code in the variant for `kind`
    pub fn from_errno(kind: ErrorKind, errno: Errno) -> Self {
        match kind {
            ErrorKind::Mapping => MmapError::Mapping(errno),
            ErrorKind::Unmap => MmapError::Unmap(errno),
            ErrorKind::Sync => MmapError::Sync(errno),
            ErrorKind::Advise => MmapError::Advise(errno),
            ErrorKind::Resource => MmapError::Resource(errno),
            ErrorKind::Protect => MmapError::Protect(errno),
            ErrorKind::Query => MmapError::Query(errno),
        }
    }

    /// Value `what` has no meaning on the platform this build targets
    pub fn unsupported(op: ErrorKind, what: &'static str) -> Self {
        MmapError::Unsupported {
            op,
            what,
            platform: crate::PLATFORM,
        }
    }

    /// Underlying OS error code
    pub fn errno(&self) -> Errno {
        match *self {
            MmapError::Mapping(errno)
            | MmapError::Unmap(errno)
            | MmapError::Sync(errno)
            | MmapError::Advise(errno)
            | MmapError::Resource(errno)
            | MmapError::Protect(errno)
            | MmapError::Query(errno) => errno,
            MmapError::Unsupported { .. } => Errno::EOPNOTSUPP,
        }
    }

    /// Get the operation family
    pub fn kind(&self) -> ErrorKind {
        match self {
            MmapError::Mapping(_) => ErrorKind::Mapping,
            MmapError::Unmap(_) => ErrorKind::Unmap,
            MmapError::Sync(_) => ErrorKind::Sync,
            MmapError::Advise(_) => ErrorKind::Advise,
            MmapError::Resource(_) => ErrorKind::Resource,
            MmapError::Protect(_) => ErrorKind::Protect,
            MmapError::Query(_) => ErrorKind::Query,
            MmapError::Unsupported { op, .. } => *op,
        }
    }

    /// Check if the caller can carry on without the failed operation
    ///
    /// Advice is only a hint, and a lock that hit `EAGAIN` may succeed
    /// once other pages are unlocked. Nothing here retries on its own.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MmapError::Advise(_) => true,
            MmapError::Unsupported { op, .. } => *op == ErrorKind::Advise,
            MmapError::Resource(errno) => *errno == Errno::EAGAIN,
            _ => false,
        }
    }

    /// Check if the platform or kernel does not know the requested value
    pub fn is_unsupported(&self) -> bool {
        matches!(self, MmapError::Unsupported { .. })
            || matches!(self.errno(), Errno::ENOSYS | Errno::EOPNOTSUPP)
    }
}

impl From<MmapError> for std::io::Error {
    fn from(err: MmapError) -> Self {
        std::io::Error::from_raw_os_error(err.errno() as i32)
    }
}
