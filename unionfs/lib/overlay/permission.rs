use std::path::PathBuf;

use crate::{
    generic_permission, AccessMask, AclKind, Credentials, OverlayInode, OvlError, OvlResult,
};

use super::{real_of, OverlayFs};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayFs {
    /// Checks the caller against the overlay inode, then the mounter against the real inode.
    ///
    /// Write access to a file that is not copied up yet is checked as read access on the lower
    /// inode, since the write will land on the copy. With [`AccessMask::NOT_BLOCK`] set, anything
    /// that would wait fails with `RetryBlocking`.
    pub(crate) async fn do_permission(
        &self,
        inode: &OverlayInode,
        mask: AccessMask,
        caller: &Credentials,
    ) -> OvlResult<()> {
        let (upper, attrs) = if mask.contains(AccessMask::NOT_BLOCK) {
            (inode.try_upper()?, inode.try_attrs()?)
        } else {
            (inode.upper(), inode.attrs())
        };

        let real = upper
            .clone()
            .or_else(|| inode.get_lower().clone())
            .ok_or(OvlError::RetryBlocking)?;

        generic_permission(&attrs, mask, caller)?;

        let mut mask = mask;
        if upper.is_none() && !inode.get_kind().is_special() && mask.contains(AccessMask::WRITE) {
            mask.remove(AccessMask::WRITE | AccessMask::APPEND);
            mask.insert(AccessMask::READ);
        }

        real.permission(mask, &self.mounter).await
    }

    pub(crate) async fn do_get_acl(
        &self,
        inode: &OverlayInode,
        kind: AclKind,
    ) -> OvlResult<Option<Vec<u8>>> {
        let real = real_of(inode)?;
        if !real.get_layer().get_fs().supports_acl() {
            return Ok(None);
        }
        real.get_acl(kind, &self.mounter).await
    }

    pub(crate) async fn do_readlink(&self, inode: &OverlayInode) -> OvlResult<PathBuf> {
        real_of(inode)?.readlink(&self.mounter).await
    }
}
