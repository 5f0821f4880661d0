use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use thiserror::Error;

use crate::RealInodeKey;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an overlay operation.
pub type OvlResult<T> = Result<T, OvlError>;

/// An error that occurred during an overlay operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum OvlError {
    /// The caller is not allowed to change the requested attributes.
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    /// The access check failed.
    #[error("access denied")]
    AccessDenied,

    /// An argument was rejected before touching any real layer.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The upper layer is missing or the overlay is mounted read-only.
    #[error("overlay is read-only")]
    ReadOnlyFilesystem,

    /// The overlay still has writers and cannot change state.
    #[error("overlay is busy: {0} writer(s) active")]
    Busy(usize),

    /// The copy-up engine failed to materialize an entry on the upper layer.
    #[error("copy-up failed: {0}")]
    CopyUpFailed(String),

    /// The cached overlay inode does not match the references found by path resolution.
    #[error("stale overlay inode for real inode {0}")]
    StaleIdentity(RealInodeKey),

    /// The persisted link-count tag is missing, malformed or out of range.
    #[error("corrupt nlink ledger: {0}")]
    CorruptLedger(String),

    /// The real inode number does not fit below the reserved high bits.
    #[error("inode number {ino} too big for {xino_bits} xino bits")]
    InodeNumberOverflow {
        /// The real inode number.
        ino: u64,

        /// The configured number of reserved high bits.
        xino_bits: u32,
    },

    /// The underlying layer returned an extended attribute listing with broken entry lengths.
    #[error("inconsistent extended attribute listing from real layer")]
    InconsistentListing,

    /// The real inode does not exist on its layer.
    #[error("real inode not found: {0}")]
    NotFound(u64),

    /// The extended attribute does not exist.
    #[error("no such attribute: {0}")]
    NoAttribute(String),

    /// The operation is not supported for this inode or name.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// The inode is not a symbolic link.
    #[error("not a symlink: overlay inode {0}")]
    NotASymlink(u64),

    /// The operation would block on a path that must not block.
    #[error("operation must be retried in blocking mode")]
    RetryBlocking,

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error from a real layer.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OvlError {
    /// Creates a new custom error.
    pub fn custom(error: impl Into<anyhow::Error>) -> OvlError {
        OvlError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns the errno a kernel or FUSE front-end would report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            OvlError::NotPermitted(_) => libc::EPERM,
            OvlError::AccessDenied => libc::EACCES,
            OvlError::InvalidArgument(_) => libc::EINVAL,
            OvlError::ReadOnlyFilesystem => libc::EROFS,
            OvlError::Busy(_) => libc::EBUSY,
            OvlError::CopyUpFailed(_) => libc::EIO,
            OvlError::StaleIdentity(_) => libc::ESTALE,
            OvlError::CorruptLedger(_) => libc::EIO,
            OvlError::InodeNumberOverflow { .. } => libc::EOVERFLOW,
            OvlError::InconsistentListing => libc::EIO,
            OvlError::NotFound(_) => libc::ENOENT,
            OvlError::NoAttribute(_) => libc::ENODATA,
            OvlError::NotSupported(_) => libc::EOPNOTSUPP,
            OvlError::NotASymlink(_) => libc::EINVAL,
            OvlError::RetryBlocking => libc::ECHILD,
            OvlError::InvalidConfig(_) => libc::EINVAL,
            OvlError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            OvlError::Custom(_) => libc::EIO,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
