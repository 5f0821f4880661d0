use std::sync::Arc;

use crate::{InodeFlags, InodeLockGuard, OverlayEntry, OverlayInode, OvlResult, WriteGuard};

use super::{real_of, OverlayFs};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How an operation changed the overlay link count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NlinkUpdate {
    /// A link was added.
    Increment,

    /// A link was removed.
    Decrement,

    /// The count is now exactly this.
    Set(u32),
}

/// A bracket around an operation that changes an entry's link count.
///
/// Holds the upper write reservation and the real inode's lock until committed or dropped.
/// Dropping without committing leaves the overlay link count unchanged.
pub struct NlinkChange<'a> {
    inode: Arc<OverlayInode>,
    _lock: InodeLockGuard,
    _guard: WriteGuard<'a>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayFs {
    /// Prepares a link, unlink or rename-over of `entry`.
    ///
    /// An indexed entry that is not copied up yet is copied up first so its index entry exists.
    /// For indexed files the union link count is recorded relative to the upper inode before the
    /// caller touches it.
    pub async fn nlink_start(&self, entry: &OverlayEntry) -> OvlResult<NlinkChange<'_>> {
        let inode = entry.get_inode();
        tracing::trace!(ino = inode.get_ino(), "nlink_start");

        let guard = self.write_access.want_write()?;

        let indexed = inode.has_flag(InodeFlags::INDEXED);
        if indexed && !inode.has_upper() {
            self.copy_up_reserved(entry, None).await?;
        }

        let lock = real_of(inode)?.lock().await;

        if indexed && !inode.is_dir() {
            self.ledger
                .record_relative_to_upper(inode, &self.mounter)
                .await?;
        }

        Ok(NlinkChange {
            inode: inode.clone(),
            _lock: lock,
            _guard: guard,
        })
    }
}

impl NlinkChange<'_> {
    /// The inode being changed.
    pub fn get_inode(&self) -> &Arc<OverlayInode> {
        &self.inode
    }

    /// Applies the change after the real operation succeeded and returns the new link count.
    pub fn commit(self, update: NlinkUpdate) -> u32 {
        match update {
            NlinkUpdate::Increment => self.inode.inc_nlink(),
            NlinkUpdate::Decrement => self.inode.drop_nlink(),
            NlinkUpdate::Set(nlink) => self.inode.set_nlink(nlink),
        }

        let nlink = self.inode.nlink();
        tracing::debug!(ino = self.inode.get_ino(), nlink, "nlink changed");
        nlink
    }
}
