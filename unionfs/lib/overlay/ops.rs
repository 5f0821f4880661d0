use std::path::PathBuf;

use async_trait::async_trait;

use crate::{
    generic_permission, AccessMask, AclKind, Credentials, ModeType, OverlayEntry, OverlayInode,
    OvlError, OvlResult, SetAttr, Stat, XattrFlags,
};

use super::OverlayFs;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Operations on regular files.
pub struct RegularOperations;

/// Operations on directories.
pub struct DirectoryOperations;

/// Operations on symbolic links.
pub struct SymlinkOperations;

/// Operations on devices, fifos and sockets.
pub struct SpecialOperations;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The metadata operation table for one kind of inode.
///
/// Every method has the behavior shared by all kinds. Each kind overrides only what differs.
#[async_trait]
pub trait InodeOperations: Send + Sync {
    /// Unified attributes.
    async fn getattr(&self, fs: &OverlayFs, entry: &OverlayEntry) -> OvlResult<Stat> {
        fs.do_getattr(entry).await
    }

    /// Attribute change with copy-up.
    async fn setattr(
        &self,
        fs: &OverlayFs,
        entry: &OverlayEntry,
        change: SetAttr,
        caller: &Credentials,
    ) -> OvlResult<()> {
        fs.do_setattr(entry, change, caller).await
    }

    /// Access check.
    async fn permission(
        &self,
        fs: &OverlayFs,
        inode: &OverlayInode,
        mask: AccessMask,
        caller: &Credentials,
    ) -> OvlResult<()> {
        fs.do_permission(inode, mask, caller).await
    }

    /// Extended attribute read.
    async fn getxattr(
        &self,
        fs: &OverlayFs,
        inode: &OverlayInode,
        name: &str,
        caller: &Credentials,
    ) -> OvlResult<Vec<u8>> {
        fs.do_getxattr(inode, name, caller).await
    }

    /// Extended attribute write or removal.
    async fn xattr_set(
        &self,
        fs: &OverlayFs,
        entry: &OverlayEntry,
        name: &str,
        value: Option<&[u8]>,
        flags: XattrFlags,
        caller: &Credentials,
    ) -> OvlResult<()> {
        fs.do_xattr_set(entry, name, value, flags, caller).await
    }

    /// Filtered extended attribute names.
    async fn listxattr(
        &self,
        fs: &OverlayFs,
        inode: &OverlayInode,
        caller: &Credentials,
    ) -> OvlResult<Vec<String>> {
        fs.do_listxattr(inode, caller).await
    }

    /// POSIX ACL.
    async fn get_acl(
        &self,
        fs: &OverlayFs,
        inode: &OverlayInode,
        kind: AclKind,
    ) -> OvlResult<Option<Vec<u8>>> {
        fs.do_get_acl(inode, kind).await
    }

    /// Symlink target.
    async fn readlink(&self, _fs: &OverlayFs, inode: &OverlayInode) -> OvlResult<PathBuf> {
        Err(OvlError::NotASymlink(inode.get_ino()))
    }
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayFs {
    /// Returns the entry's attributes as seen through the overlay.
    pub async fn getattr(&self, entry: &OverlayEntry) -> OvlResult<Stat> {
        let inode = entry.get_inode();
        tracing::trace!(ino = inode.get_ino(), "getattr");
        operations_for(inode.get_kind()).getattr(self, entry).await
    }

    /// Changes the entry's attributes, copying it up first.
    pub async fn setattr(
        &self,
        entry: &OverlayEntry,
        change: SetAttr,
        caller: &Credentials,
    ) -> OvlResult<()> {
        let inode = entry.get_inode();
        tracing::trace!(ino = inode.get_ino(), ?change, "setattr");
        operations_for(inode.get_kind())
            .setattr(self, entry, change, caller)
            .await
    }

    /// Checks whether `caller` may access the inode with `mask`.
    pub async fn permission(
        &self,
        inode: &OverlayInode,
        mask: AccessMask,
        caller: &Credentials,
    ) -> OvlResult<()> {
        tracing::trace!(ino = inode.get_ino(), mask = mask.bits(), "permission");
        operations_for(inode.get_kind())
            .permission(self, inode, mask, caller)
            .await
    }

    /// Reads an extended attribute.
    pub async fn getxattr(
        &self,
        inode: &OverlayInode,
        name: &str,
        caller: &Credentials,
    ) -> OvlResult<Vec<u8>> {
        tracing::trace!(ino = inode.get_ino(), name, "getxattr");
        operations_for(inode.get_kind())
            .getxattr(self, inode, name, caller)
            .await
    }

    /// Sets an extended attribute, copying the entry up first.
    pub async fn setxattr(
        &self,
        entry: &OverlayEntry,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
        caller: &Credentials,
    ) -> OvlResult<()> {
        let inode = entry.get_inode();
        tracing::trace!(ino = inode.get_ino(), name, ?flags, "setxattr");
        operations_for(inode.get_kind())
            .xattr_set(self, entry, name, Some(value), flags, caller)
            .await
    }

    /// Removes an extended attribute, copying the entry up first if the attribute exists.
    pub async fn removexattr(
        &self,
        entry: &OverlayEntry,
        name: &str,
        caller: &Credentials,
    ) -> OvlResult<()> {
        let inode = entry.get_inode();
        tracing::trace!(ino = inode.get_ino(), name, "removexattr");
        operations_for(inode.get_kind())
            .xattr_set(self, entry, name, None, XattrFlags::Any, caller)
            .await
    }

    /// Lists the extended attributes `caller` may see.
    pub async fn listxattr(
        &self,
        inode: &OverlayInode,
        caller: &Credentials,
    ) -> OvlResult<Vec<String>> {
        tracing::trace!(ino = inode.get_ino(), "listxattr");
        operations_for(inode.get_kind())
            .listxattr(self, inode, caller)
            .await
    }

    /// Reads a POSIX ACL of the real inode. `None` if the layer has no ACL support or none is set.
    pub async fn get_acl(
        &self,
        inode: &OverlayInode,
        kind: AclKind,
    ) -> OvlResult<Option<Vec<u8>>> {
        tracing::trace!(ino = inode.get_ino(), ?kind, "get_acl");
        operations_for(inode.get_kind())
            .get_acl(self, inode, kind)
            .await
    }

    /// Reads a symlink target.
    pub async fn readlink(&self, inode: &OverlayInode) -> OvlResult<PathBuf> {
        tracing::trace!(ino = inode.get_ino(), "readlink");
        operations_for(inode.get_kind()).readlink(self, inode).await
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the operation table for a kind of inode.
pub fn operations_for(kind: ModeType) -> &'static dyn InodeOperations {
    match kind {
        ModeType::File => &RegularOperations,
        ModeType::Directory => &DirectoryOperations,
        ModeType::Symlink => &SymlinkOperations,
        ModeType::CharDevice | ModeType::BlockDevice | ModeType::Fifo | ModeType::Socket => {
            &SpecialOperations
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl InodeOperations for RegularOperations {
    // Only directories carry a default ACL.
    async fn get_acl(
        &self,
        fs: &OverlayFs,
        inode: &OverlayInode,
        kind: AclKind,
    ) -> OvlResult<Option<Vec<u8>>> {
        if kind == AclKind::Default {
            return Ok(None);
        }
        fs.do_get_acl(inode, kind).await
    }
}

#[async_trait]
impl InodeOperations for DirectoryOperations {}

#[async_trait]
impl InodeOperations for SpecialOperations {
    async fn get_acl(
        &self,
        fs: &OverlayFs,
        inode: &OverlayInode,
        kind: AclKind,
    ) -> OvlResult<Option<Vec<u8>>> {
        if kind == AclKind::Default {
            return Ok(None);
        }
        fs.do_get_acl(inode, kind).await
    }
}

#[async_trait]
impl InodeOperations for SymlinkOperations {
    /// Symlink mode bits are not enforced by real filesystems, so only the overlay check runs.
    async fn permission(
        &self,
        _fs: &OverlayFs,
        inode: &OverlayInode,
        mask: AccessMask,
        caller: &Credentials,
    ) -> OvlResult<()> {
        let attrs = if mask.contains(AccessMask::NOT_BLOCK) {
            inode.try_attrs()?
        } else {
            inode.attrs()
        };
        generic_permission(&attrs, mask, caller)
    }

    async fn get_acl(
        &self,
        _fs: &OverlayFs,
        _inode: &OverlayInode,
        _kind: AclKind,
    ) -> OvlResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn readlink(&self, fs: &OverlayFs, inode: &OverlayInode) -> OvlResult<PathBuf> {
        fs.do_readlink(inode).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
