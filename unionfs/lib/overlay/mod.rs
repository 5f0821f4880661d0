//! The overlay façade.
//!
//! [`OverlayFs`] ties the layer stack, identity resolver, link-count ledger and inode cache
//! together and exposes the metadata operations of the unified tree:
//!
//! - attribute projection ([`OverlayFs::getattr`], [`OverlayFs::setattr`])
//! - two-phase permission checks ([`OverlayFs::permission`])
//! - extended attributes with private-namespace filtering
//! - link-count brackets for link, unlink and rename ([`OverlayFs::nlink_start`])
//!
//! Public operations dispatch on the inode kind through [`InodeOperations`].
//!
//! Calls into real layers always run under the mounter's credentials, passed explicitly. The
//! caller's credentials are only used for the checks made against the overlay inode itself.

mod attr;
mod nlink;
mod ops;
mod permission;
mod xattr;

use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::{
    defaults::{OVERLAY_XATTR_IMPURE, OVERLAY_XATTR_ORIGIN},
    CopyUp, CopyUpContext, Credentials, IdentityResolver, InodeCache, InodeFlags, LayerRegistry,
    NlinkLedger, OpenFlags, OverlayConfig, OverlayEntry, OverlayInode, OvlError, OvlResult,
    RealInode, UpperWriteAccess,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use nlink::*;
pub use ops::*;
pub use xattr::filter_xattr_list;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The metadata core of an overlay filesystem.
pub struct OverlayFs {
    config: OverlayConfig,
    registry: Arc<dyn LayerRegistry>,
    copy_up: Arc<dyn CopyUp>,
    mounter: Credentials,
    resolver: IdentityResolver,
    ledger: NlinkLedger,
    cache: InodeCache,
    write_access: UpperWriteAccess,
}

/// The references path resolution found for one entry.
#[derive(Debug, Clone, TypedBuilder)]
pub struct InodeParams {
    /// The upper inode, if the entry exists on the upper layer.
    #[builder(default, setter(strip_option))]
    upper: Option<RealInode>,

    /// The topmost lower inode, if any.
    #[builder(default, setter(strip_option))]
    lower: Option<RealInode>,

    /// The entry is tracked by an index entry.
    #[builder(default)]
    index: bool,

    /// Number of lower inodes under the entry.
    #[builder(default)]
    num_lower: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayFs {
    /// Creates the overlay. Real-layer calls run as the current process until
    /// [`with_mounter`](Self::with_mounter) says otherwise.
    pub fn new(
        config: OverlayConfig,
        registry: Arc<dyn LayerRegistry>,
        copy_up: Arc<dyn CopyUp>,
    ) -> OvlResult<Self> {
        let same_fs = registry.same_filesystem();
        let xino_bits = config.get_xino().resolve(same_fs, registry.max_fsid())?;

        tracing::debug!(
            same_fs,
            xino_bits,
            layers = registry.layers().len(),
            "creating overlay"
        );

        let resolver = IdentityResolver::new(
            config.get_overlay_dev(),
            same_fs,
            xino_bits,
            config.get_ratelimit().limiter("overlay inode numbers"),
        );
        let ledger = NlinkLedger::new(config.get_ratelimit().limiter("overlay index nlink"));
        let write_access = UpperWriteAccess::new(registry.upper().is_some());

        Ok(Self {
            config,
            registry,
            copy_up,
            mounter: Credentials::current(),
            resolver,
            ledger,
            cache: InodeCache::new(),
            write_access,
        })
    }

    /// Sets the credentials real-layer calls run under.
    pub fn with_mounter(mut self, mounter: Credentials) -> Self {
        self.mounter = mounter;
        self
    }

    /// The configuration.
    pub fn get_config(&self) -> &OverlayConfig {
        &self.config
    }

    /// The layer stack.
    pub fn get_registry(&self) -> &Arc<dyn LayerRegistry> {
        &self.registry
    }

    /// The credentials real-layer calls run under.
    pub fn get_mounter(&self) -> &Credentials {
        &self.mounter
    }

    /// The identity resolver.
    pub fn get_resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// The link-count ledger.
    pub fn get_ledger(&self) -> &NlinkLedger {
        &self.ledger
    }

    /// The inode cache.
    pub fn get_cache(&self) -> &InodeCache {
        &self.cache
    }

    /// Returns the overlay inode for the references path resolution found, creating it on first
    /// resolution.
    ///
    /// Fails with `StaleIdentity` if an inode is already published for the governing reference
    /// but records different references.
    pub async fn get_inode(&self, params: InodeParams) -> OvlResult<Arc<OverlayInode>> {
        let InodeParams {
            upper,
            lower,
            index,
            num_lower,
        } = params;
        let num_lower = num_lower.max(lower.is_some() as usize);

        let real = upper.as_ref().or(lower.as_ref()).ok_or_else(|| {
            OvlError::InvalidArgument("entry has neither upper nor lower inode".to_string())
        })?;
        let stat = real.getattr(&self.mounter).await?;
        let is_dir = stat.is_dir();

        let lower_nlink = match (&upper, &lower) {
            (Some(_), Some(lower)) => lower.getattr(&self.mounter).await?.nlink,
            (None, Some(_)) => stat.nlink,
            (_, None) => 0,
        };

        let by_lower = self.hash_by_lower(upper.as_ref(), lower.as_ref(), lower_nlink, index);
        let governing = if by_lower { lower.as_ref() } else { upper.as_ref() };

        let Some(governing) = governing else {
            // Lower hardlink that will be broken on copy-up. Keep it out of the cache.
            let inode = OverlayInode::new(
                self.cache.next_ino(),
                None,
                None,
                lower.clone(),
                stat.nlink,
                &stat,
            )?;
            self.init_flags(&inode, index, num_lower).await?;
            tracing::debug!(ino = inode.get_ino(), "created unhashed overlay inode");
            return Ok(Arc::new(inode));
        };

        let key = governing.key();
        let fsid = if by_lower {
            governing.get_layer().get_fsid()
        } else {
            0
        };

        let (inode, created) = self
            .cache
            .find_or_create(key, || async {
                let nlink = if is_dir {
                    1
                } else {
                    self.ledger
                        .read(lower.as_ref(), upper.as_ref(), stat.nlink, &self.mounter)
                        .await
                };

                let ino = self.local_ino(key.get_ino(), fsid);
                let inode =
                    OverlayInode::new(ino, Some(key), upper.clone(), lower.clone(), nlink, &stat)?;
                self.init_flags(&inode, index, num_lower).await?;
                Ok::<_, OvlError>(inode)
            })
            .await?;

        if !created && !inode.verify(lower.as_ref(), upper.as_ref(), true) {
            tracing::debug!(%key, ino = inode.get_ino(), "cached overlay inode is stale");
            return Err(OvlError::StaleIdentity(key));
        }

        Ok(inode)
    }

    /// Finds an already published overlay inode by one of its real inodes.
    pub fn lookup_inode(
        &self,
        real: &RealInode,
        is_upper: bool,
    ) -> OvlResult<Option<Arc<OverlayInode>>> {
        let Some(inode) = self.cache.lookup(&real.key()) else {
            return Ok(None);
        };

        let (lower, upper) = if is_upper {
            (None, Some(real))
        } else {
            (Some(real), None)
        };

        if !inode.verify(lower, upper, false) {
            return Err(OvlError::StaleIdentity(real.key()));
        }

        Ok(Some(inode))
    }

    /// Drops an overlay inode from the cache.
    pub fn evict(&self, inode: &OverlayInode) -> bool {
        let evicted = self.cache.evict(inode);
        if evicted {
            tracing::debug!(ino = inode.get_ino(), "evicted overlay inode");
        }
        evicted
    }

    /// Copies an entry up to the upper layer, holding a write reservation for the duration.
    pub async fn copy_up(&self, entry: &OverlayEntry) -> OvlResult<RealInode> {
        let _guard = self.write_access.want_write()?;
        self.copy_up_reserved(entry, None).await
    }

    /// Copies a file up if it is being opened for writing or truncation.
    pub async fn open_maybe_copy_up(
        &self,
        entry: &OverlayEntry,
        flags: OpenFlags,
    ) -> OvlResult<()> {
        if !Self::open_needs_copy_up(entry.get_inode(), flags) {
            return Ok(());
        }

        let _guard = self.write_access.want_write()?;
        self.copy_up_reserved(entry, Some(flags)).await?;
        Ok(())
    }

    /// Switches the overlay to read-only. Fails with `Busy` while a mutation is in flight.
    pub fn remount_read_only(&self) -> OvlResult<()> {
        self.write_access.remount_read_only()
    }

    /// Switches the overlay back to read-write.
    pub fn remount_read_write(&self) -> OvlResult<()> {
        self.write_access.remount_read_write()
    }

    /// Returns true if the overlay refuses writes.
    pub fn is_read_only(&self) -> bool {
        self.write_access.is_read_only()
    }

    fn open_needs_copy_up(inode: &OverlayInode, flags: OpenFlags) -> bool {
        if inode.has_upper() || inode.get_kind().is_special() {
            return false;
        }
        flags.wants_write() || flags.truncates()
    }

    /// Decides whether an inode is keyed by its lower reference.
    fn hash_by_lower(
        &self,
        upper: Option<&RealInode>,
        lower: Option<&RealInode>,
        lower_nlink: u32,
        index: bool,
    ) -> bool {
        let Some(lower) = lower else {
            return false;
        };

        if index {
            return true;
        }

        // Never copied up.
        if self.registry.upper().is_none() {
            return true;
        }

        // Lower hardlink is or will be broken on copy-up.
        if (upper.is_some() || !self.config.get_index()) && !lower.is_dir() && lower_nlink > 1 {
            return false;
        }

        if self.config.get_export_handles() && upper.is_some() {
            return false;
        }

        true
    }

    fn local_ino(&self, real_ino: u64, fsid: u32) -> u64 {
        if !self.resolver.unifies() {
            return self.cache.next_ino();
        }
        self.resolver
            .encode_xino(real_ino, fsid)
            .unwrap_or_else(|_| self.cache.next_ino())
    }

    async fn init_flags(
        &self,
        inode: &OverlayInode,
        index: bool,
        num_lower: usize,
    ) -> OvlResult<()> {
        let upper = inode.upper();

        if let Some(upper) = &upper {
            if self.has_xattr(upper, OVERLAY_XATTR_IMPURE).await? {
                inode.set_flag(InodeFlags::IMPURE);
            }
        }

        if index {
            inode.set_flag(InodeFlags::INDEXED);
        }

        if inode.is_dir() {
            let merged = (upper.is_some() && inode.get_lower().is_some()) || num_lower > 1;
            let has_origin = match inode.real() {
                Some(real) => self.has_xattr(&real, OVERLAY_XATTR_ORIGIN).await?,
                None => false,
            };
            if merged || has_origin {
                inode.set_flag(InodeFlags::HAS_WHITEOUTS);
            }
        }

        Ok(())
    }

    async fn has_xattr(&self, real: &RealInode, name: &str) -> OvlResult<bool> {
        match real.getxattr(name, &self.mounter).await {
            Ok(_) => Ok(true),
            Err(OvlError::NoAttribute(_)) | Err(OvlError::NotSupported(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Runs the copy-up engine. The caller holds a write reservation.
    ///
    /// Concurrent calls for one inode are serialized, and the engine only runs for the first.
    async fn copy_up_reserved(
        &self,
        entry: &OverlayEntry,
        flags: Option<OpenFlags>,
    ) -> OvlResult<RealInode> {
        let inode = entry.get_inode();
        if let Some(upper) = inode.upper() {
            return Ok(upper);
        }

        let _serial = inode.copy_up_lock().lock().await;
        if let Some(upper) = inode.upper() {
            return Ok(upper);
        }

        let layer = self.registry.upper().ok_or(OvlError::ReadOnlyFilesystem)?;
        let ctx = CopyUpContext::new(&self.mounter, layer, &self.config, &self.ledger);

        tracing::debug!(ino = inode.get_ino(), ?flags, "copying up");
        let copied = self.copy_up.copy_up(&ctx, entry, flags).await?;

        let upper = copied.get_upper().clone();
        let stat = upper.getattr(&self.mounter).await?;

        inode.attach_upper(upper.clone());
        if copied.get_indexed() {
            inode.set_flag(InodeFlags::INDEXED);
        }
        inode.copy_attrs_from(&stat);

        Ok(upper)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The reference an operation goes to: upper if present, else lower.
fn real_of(inode: &OverlayInode) -> OvlResult<RealInode> {
    inode.real().ok_or(OvlError::NotFound(inode.get_ino()))
}
