use std::sync::Arc;

use chrono::Utc;

use crate::{
    setattr_prepare, Credentials, InodeFlags, Layer, OverlayEntry, OverlayInode, OvlResult,
    SetAttr, Stat,
};

use super::{real_of, OverlayFs};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayFs {
    /// Reads the real attributes and replaces device, inode number and link count with their
    /// unified values.
    ///
    /// The inode number comes from the lower inode while the entry is not copied up. After
    /// copy-up, the origin's number is kept only when it cannot be shared by two distinct upper
    /// files: the entry is indexed, or lower verification is off and the entry is a directory or
    /// an unlinked-elsewhere file.
    pub(crate) async fn do_getattr(&self, entry: &OverlayEntry) -> OvlResult<Stat> {
        let inode = entry.get_inode();
        let is_dir = inode.is_dir();
        let path_type = entry.path_type();
        let real = real_of(inode)?;

        let mut stat = real.getattr(&self.mounter).await?;
        let mut lower_layer: Option<Arc<Layer>> = None;

        if !is_dir || self.resolver.unifies() {
            if !path_type.upper {
                lower_layer = Some(real.get_layer().clone());
            } else if path_type.origin {
                if let Some(lower) = entry.lower() {
                    let lower_stat = lower.getattr(&self.mounter).await?;
                    let trusted = inode.has_flag(InodeFlags::INDEXED)
                        || (!self.config.get_verify_lower()
                            && (is_dir || lower_stat.nlink == 1));

                    if trusted {
                        stat.ino = lower_stat.ino;
                        lower_layer = Some(lower.get_layer().clone());
                    }
                }
            }
        }

        let mapped = self.resolver.map_identity(
            stat.dev,
            stat.ino,
            is_dir,
            lower_layer.as_deref(),
            inode.get_ino(),
        );
        stat.dev = mapped.dev;
        stat.ino = mapped.ino;

        if is_dir && path_type.merge {
            stat.nlink = 1;
        }

        // The upper nlink of an indexed file includes the index hardlink.
        if !is_dir && inode.has_flag(InodeFlags::INDEXED) {
            stat.nlink = inode.nlink();
        }

        Ok(stat)
    }

    /// Applies an attribute change on the upper layer, copying the entry up first if needed.
    pub(crate) async fn do_setattr(
        &self,
        entry: &OverlayEntry,
        mut change: SetAttr,
        caller: &Credentials,
    ) -> OvlResult<()> {
        let inode = entry.get_inode();
        setattr_prepare(&inode.attrs(), &change, caller)?;

        let _guard = self.write_access.want_write()?;
        let upper = self.copy_up_reserved(entry, None).await?;

        if change.get_kill_suid() && change.get_kill_sgid() {
            change.clear_mode();
        }

        let _lock = upper.lock().await;
        let stat = upper.setattr(&change, &self.mounter).await?;
        inode.copy_attrs_from(&stat);

        Ok(())
    }

    /// Touches the upper inode's access time. Does nothing before copy-up or while the overlay
    /// is read-only.
    pub async fn update_time(&self, inode: &OverlayInode, atime: bool) -> OvlResult<()> {
        tracing::trace!(ino = inode.get_ino(), atime, "update_time");

        if !atime {
            return Ok(());
        }

        let Some(upper) = inode.upper() else {
            return Ok(());
        };

        // Access times are skipped, not refused, on a read-only mount.
        let Ok(_guard) = self.write_access.want_write() else {
            return Ok(());
        };

        let change = SetAttr::builder().atime(Utc::now()).build();
        let _lock = upper.lock().await;
        let stat = upper.setattr(&change, &self.mounter).await?;
        inode.copy_attrs_from(&stat);

        Ok(())
    }
}
