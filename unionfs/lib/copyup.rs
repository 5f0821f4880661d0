use std::sync::Arc;

use async_trait::async_trait;
use getset::{CopyGetters, Getters};

use crate::{Credentials, Layer, NlinkLedger, OverlayConfig, OverlayEntry, OvlResult, RealInode};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Flags an entry is being opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(i32);

/// What a copy-up engine gets to work with.
pub struct CopyUpContext<'a> {
    creds: &'a Credentials,
    upper: &'a Arc<Layer>,
    config: &'a OverlayConfig,
    ledger: &'a NlinkLedger,
}

/// The result of a successful copy-up.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct CopiedUp {
    /// The new upper inode.
    #[getset(get = "pub with_prefix")]
    upper: RealInode,

    /// The upper inode is linked from the index.
    #[getset(get_copy = "pub with_prefix")]
    indexed: bool,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Materializes a lower entry on the upper layer.
///
/// The overlay serializes calls per inode and never calls the engine for an entry that already
/// has an upper reference.
#[async_trait]
pub trait CopyUp: Send + Sync {
    /// Copies `entry` up. `flags` are set when the copy-up is triggered by an open.
    async fn copy_up(
        &self,
        ctx: &CopyUpContext<'_>,
        entry: &OverlayEntry,
        flags: Option<OpenFlags>,
    ) -> OvlResult<CopiedUp>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OpenFlags {
    /// Read only.
    pub const READ_ONLY: OpenFlags = OpenFlags(libc::O_RDONLY);

    /// Write only.
    pub const WRITE_ONLY: OpenFlags = OpenFlags(libc::O_WRONLY);

    /// Read and write.
    pub const READ_WRITE: OpenFlags = OpenFlags(libc::O_RDWR);

    /// Truncate on open.
    pub const TRUNCATE: OpenFlags = OpenFlags(libc::O_TRUNC);

    /// Append on write.
    pub const APPEND: OpenFlags = OpenFlags(libc::O_APPEND);

    /// Wraps raw `open(2)` flags.
    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    /// Returns the raw flags.
    pub fn bits(&self) -> i32 {
        self.0
    }

    /// Returns true if the access mode allows writing.
    pub fn wants_write(&self) -> bool {
        matches!(self.0 & libc::O_ACCMODE, libc::O_WRONLY | libc::O_RDWR)
    }

    /// Returns true if the file is truncated on open.
    pub fn truncates(&self) -> bool {
        self.0 & libc::O_TRUNC != 0
    }
}

impl<'a> CopyUpContext<'a> {
    pub(crate) fn new(
        creds: &'a Credentials,
        upper: &'a Arc<Layer>,
        config: &'a OverlayConfig,
        ledger: &'a NlinkLedger,
    ) -> Self {
        Self {
            creds,
            upper,
            config,
            ledger,
        }
    }

    /// Credentials to act under on both layers.
    pub fn get_creds(&self) -> &'a Credentials {
        self.creds
    }

    /// The layer to copy to.
    pub fn get_upper(&self) -> &'a Arc<Layer> {
        self.upper
    }

    /// The overlay configuration.
    pub fn get_config(&self) -> &'a OverlayConfig {
        self.config
    }

    /// Records the entry's union nlink relative to its lower inode on the index entry `index`.
    /// Must run before the index entry is linked into place.
    pub async fn record_nlink_relative_to_lower(
        &self,
        entry: &OverlayEntry,
        index: &RealInode,
    ) -> OvlResult<()> {
        self.ledger
            .record_relative_to_lower(entry.get_inode(), index, self.creds)
            .await
    }
}

impl CopiedUp {
    /// Creates a copy-up result.
    pub fn new(upper: RealInode, indexed: bool) -> Self {
        Self { upper, indexed }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags() {
        assert!(!OpenFlags::READ_ONLY.wants_write());
        assert!(OpenFlags::WRITE_ONLY.wants_write());
        assert!((OpenFlags::READ_WRITE | OpenFlags::APPEND).wants_write());
        assert!((OpenFlags::READ_ONLY | OpenFlags::TRUNCATE).truncates());
        assert!(!OpenFlags::READ_WRITE.truncates());
    }
}
