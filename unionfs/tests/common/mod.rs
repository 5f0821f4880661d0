#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use unionfs::{
    CopiedUp, CopyUp, CopyUpContext, Credentials, InodeParams, Layer, LayerRegistry, MemoryCopyUp,
    MemoryRealFs, ModeType, OpenFlags, OverlayConfig, OverlayEntry, OverlayFs, OvlError,
    OvlResult, RealFileSystem, RealInode, StaticLayerRegistry,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

pub const UPPER_DEV: u64 = 1;
pub const LOWER_DEV: u64 = 2;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An overlay of one in-memory upper layer over one in-memory lower layer.
pub struct Fixture {
    pub upper_fs: Arc<MemoryRealFs>,
    pub lower_fs: Arc<MemoryRealFs>,
    pub upper: Arc<Layer>,
    pub lower: Arc<Layer>,
    pub overlay: OverlayFs,
}

/// A copy-up engine whose every copy-up fails.
pub struct FailingCopyUp;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Fixture {
    /// Layers on two different devices.
    pub fn new(config: OverlayConfig) -> OvlResult<Self> {
        let upper_fs = Arc::new(MemoryRealFs::new(UPPER_DEV));
        let lower_fs = Arc::new(MemoryRealFs::new(LOWER_DEV));
        Self::build(config, upper_fs, lower_fs)
    }

    /// Both layers on one device.
    pub fn same_fs(config: OverlayConfig) -> OvlResult<Self> {
        let shared = Arc::new(MemoryRealFs::new(UPPER_DEV));
        Self::build(config, shared.clone(), shared)
    }

    /// Layers on two different devices, with copy-up always failing.
    pub fn failing_copy_up(config: OverlayConfig) -> OvlResult<Self> {
        let upper_fs = Arc::new(MemoryRealFs::new(UPPER_DEV));
        let lower_fs = Arc::new(MemoryRealFs::new(LOWER_DEV));
        Self::build_with(config, upper_fs, lower_fs, Arc::new(FailingCopyUp))
    }

    /// Layers backed by the given filesystems.
    pub fn build(
        config: OverlayConfig,
        upper_fs: Arc<MemoryRealFs>,
        lower_fs: Arc<MemoryRealFs>,
    ) -> OvlResult<Self> {
        let copy_up = Arc::new(MemoryCopyUp::new(upper_fs.clone()));
        Self::build_with(config, upper_fs, lower_fs, copy_up)
    }

    /// Layers backed by the given filesystems and copy-up engine.
    pub fn build_with(
        config: OverlayConfig,
        upper_fs: Arc<MemoryRealFs>,
        lower_fs: Arc<MemoryRealFs>,
        copy_up: Arc<dyn CopyUp>,
    ) -> OvlResult<Self> {
        let upper_dyn: Arc<dyn RealFileSystem> = upper_fs.clone();
        let lower_dyn: Arc<dyn RealFileSystem> = lower_fs.clone();
        let registry = StaticLayerRegistry::new(Some(upper_dyn), vec![lower_dyn])?;

        let upper = registry.layers()[0].clone();
        let lower = registry.layers()[1].clone();

        let overlay =
            OverlayFs::new(config, Arc::new(registry), copy_up)?.with_mounter(Credentials::root());

        Ok(Self {
            upper_fs,
            lower_fs,
            upper,
            lower,
            overlay,
        })
    }

    /// Creates an inode on the lower layer.
    pub async fn lower_inode(&self, kind: ModeType, perms: u32, uid: u32, gid: u32) -> RealInode {
        let ino = self.lower_fs.create(kind, perms, uid, gid).await;
        RealInode::new(self.lower.clone(), ino, kind)
    }

    /// Creates an inode on the upper layer.
    pub async fn upper_inode(&self, kind: ModeType, perms: u32, uid: u32, gid: u32) -> RealInode {
        let ino = self.upper_fs.create(kind, perms, uid, gid).await;
        RealInode::new(self.upper.clone(), ino, kind)
    }

    /// Resolves an entry the way a lookup that found these references would.
    pub async fn entry(
        &self,
        upper: Option<RealInode>,
        lower: Option<RealInode>,
        index: bool,
    ) -> OvlResult<OverlayEntry> {
        let lower_stack: Vec<_> = lower.iter().cloned().collect();
        let params = match (upper, lower) {
            (Some(upper), Some(lower)) => InodeParams::builder()
                .upper(upper)
                .lower(lower)
                .index(index)
                .build(),
            (Some(upper), None) => InodeParams::builder().upper(upper).index(index).build(),
            (None, Some(lower)) => InodeParams::builder().lower(lower).index(index).build(),
            (None, None) => InodeParams::builder().index(index).build(),
        };

        let inode = self.overlay.get_inode(params).await?;
        Ok(OverlayEntry::new(inode, lower_stack))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CopyUp for FailingCopyUp {
    async fn copy_up(
        &self,
        _ctx: &CopyUpContext<'_>,
        _entry: &OverlayEntry,
        _flags: Option<OpenFlags>,
    ) -> OvlResult<CopiedUp> {
        Err(OvlError::CopyUpFailed("upper layer is full".to_string()))
    }
}
