use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    defaults::{OVERLAY_XATTR_ORIGIN, OVERLAY_XATTR_PREFIX},
    CopiedUp, CopyUp, CopyUpContext, MemoryRealFs, OpenFlags, OverlayEntry, OvlError, OvlResult,
    RealFileSystem, RealInode, SetAttr, XattrFlags,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A copy-up engine for an upper layer backed by [`MemoryRealFs`].
///
/// Copies attributes and public extended attributes, and records the origin. A lower file with
/// other hard links is linked from the index when indexing is enabled.
pub struct MemoryCopyUp {
    upper: Arc<MemoryRealFs>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryCopyUp {
    /// Creates an engine that copies onto `upper`.
    pub fn new(upper: Arc<MemoryRealFs>) -> Self {
        Self { upper }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CopyUp for MemoryCopyUp {
    async fn copy_up(
        &self,
        ctx: &CopyUpContext<'_>,
        entry: &OverlayEntry,
        flags: Option<OpenFlags>,
    ) -> OvlResult<CopiedUp> {
        let layer = ctx.get_upper();
        if layer.get_dev() != self.upper.device_id() {
            return Err(OvlError::CopyUpFailed(format!(
                "upper layer is device {}, engine writes to {}",
                layer.get_dev(),
                self.upper.device_id()
            )));
        }

        let lower = entry
            .lower()
            .ok_or_else(|| OvlError::CopyUpFailed("entry has no lower inode".to_string()))?;
        let creds = ctx.get_creds();

        let stat = lower.getattr(creds).await?;
        let ino = self.upper.create_from(&stat).await;

        if flags.is_some_and(|flags| flags.truncates()) && !stat.is_dir() {
            let change = SetAttr::builder().size(0).build();
            self.upper.setattr(ino, &change, creds).await?;
        }

        let names = lower.listxattr(creds).await?;
        for name in names.split(|&b| b == 0).filter(|name| !name.is_empty()) {
            let name = String::from_utf8_lossy(name);
            if name.starts_with(OVERLAY_XATTR_PREFIX) {
                continue;
            }

            let value = lower.getxattr(&name, creds).await?;
            self.upper
                .setxattr(ino, &name, &value, XattrFlags::Any, creds)
                .await?;
        }

        let origin = lower.key().to_string();
        self.upper
            .setxattr(ino, OVERLAY_XATTR_ORIGIN, origin.as_bytes(), XattrFlags::Any, creds)
            .await?;

        let upper = RealInode::new(layer.clone(), ino, lower.get_kind());
        let indexed = ctx.get_config().get_index() && !stat.is_dir() && stat.nlink > 1;

        if indexed {
            ctx.record_nlink_relative_to_lower(entry, &upper).await?;
            self.upper.link(ino).await?;
        }

        tracing::debug!(
            lower = %lower.key(),
            upper = %upper.key(),
            indexed,
            "copied up"
        );

        Ok(CopiedUp::new(upper, indexed))
    }
}
