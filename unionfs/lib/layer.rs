use std::{collections::HashMap, fmt, sync::Arc};

use dashmap::DashMap;
use getset::{CopyGetters, Getters};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{defaults::DEFAULT_PSEUDO_DEV_BASE, OvlError, OvlResult, RealFileSystem};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Whether a layer receives writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerRole {
    /// The single writable layer.
    Upper,

    /// A read-only layer beneath the upper one.
    Lower,
}

/// One layer of the overlay, backed by a real filesystem.
#[derive(Getters, CopyGetters)]
pub struct Layer {
    /// Position in the layer stack, top first.
    #[getset(get_copy = "pub with_prefix")]
    index: usize,

    /// Upper or lower.
    #[getset(get_copy = "pub with_prefix")]
    role: LayerRole,

    /// Layer id placed in the high bits of unified inode numbers. Zero for the upper layer and
    /// for lower layers that share the upper's filesystem.
    #[getset(get_copy = "pub with_prefix")]
    fsid: u32,

    /// Device id reported for this layer's non-directories when numbers cannot be unified.
    #[getset(get_copy = "pub with_prefix")]
    pseudo_dev: u64,

    /// Device id of the backing filesystem.
    #[getset(get_copy = "pub with_prefix")]
    dev: u64,

    /// The backing filesystem.
    #[getset(get = "pub with_prefix")]
    fs: Arc<dyn RealFileSystem>,

    /// Exclusive per-inode locks, shared by every layer on the same filesystem.
    locks: Arc<InodeLocks>,
}

/// Read-only view of the ordered layer stack.
pub trait LayerRegistry: Send + Sync {
    /// All layers, upper first (if any), then lowers from top to bottom.
    fn layers(&self) -> &[Arc<Layer>];

    /// True if every layer resolves to one physical filesystem.
    fn same_filesystem(&self) -> bool;

    /// The writable layer, if the overlay has one.
    fn upper(&self) -> Option<&Arc<Layer>> {
        self.layers()
            .first()
            .filter(|layer| layer.role == LayerRole::Upper)
    }

    /// The largest fsid in use.
    fn max_fsid(&self) -> u32 {
        self.layers().iter().map(|layer| layer.fsid).max().unwrap_or(0)
    }
}

/// A layer registry built once from a fixed set of filesystems.
pub struct StaticLayerRegistry {
    layers: Vec<Arc<Layer>>,
    same_fs: bool,
}

/// Exclusive lock on one real inode. The lock table forgets the inode once its last guard drops.
pub struct InodeLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<InodeLocks>,
    ino: u64,
}

#[derive(Default)]
struct InodeLocks {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Layer {
    /// Returns true for the writable layer.
    pub fn is_upper(&self) -> bool {
        self.role == LayerRole::Upper
    }

    /// Acquires the exclusive lock of inode `ino` on this layer's filesystem.
    pub async fn lock_inode(&self, ino: u64) -> InodeLockGuard {
        let guard = self.locks.get(ino).lock_owned().await;
        InodeLockGuard {
            guard: Some(guard),
            locks: self.locks.clone(),
            ino,
        }
    }

    /// Tries to acquire the exclusive lock of inode `ino` without waiting.
    pub fn try_lock_inode(&self, ino: u64) -> Option<InodeLockGuard> {
        let guard = self.locks.get(ino).try_lock_owned().ok()?;
        Some(InodeLockGuard {
            guard: Some(guard),
            locks: self.locks.clone(),
            ino,
        })
    }
}

impl StaticLayerRegistry {
    /// Builds the layer stack with the default pseudo device base.
    pub fn new(
        upper: Option<Arc<dyn RealFileSystem>>,
        lowers: Vec<Arc<dyn RealFileSystem>>,
    ) -> OvlResult<Self> {
        Self::with_pseudo_dev_base(upper, lowers, DEFAULT_PSEUDO_DEV_BASE)
    }

    /// Builds the layer stack, assigning fsids and pseudo devices.
    ///
    /// A lower layer on the same device as the upper gets fsid 0. Every other distinct lower
    /// device gets the next positive fsid, and lowers on one device share it.
    pub fn with_pseudo_dev_base(
        upper: Option<Arc<dyn RealFileSystem>>,
        lowers: Vec<Arc<dyn RealFileSystem>>,
        pseudo_dev_base: u64,
    ) -> OvlResult<Self> {
        if upper.is_none() && lowers.is_empty() {
            return Err(OvlError::InvalidConfig("overlay has no layers".to_string()));
        }

        let mut locks: HashMap<u64, Arc<InodeLocks>> = HashMap::new();
        let mut fsids: HashMap<u64, u32> = HashMap::new();
        let mut layers = Vec::with_capacity(lowers.len() + 1);

        if let Some(fs) = upper {
            let dev = fs.device_id();
            fsids.insert(dev, 0);
            layers.push(Arc::new(Layer {
                index: 0,
                role: LayerRole::Upper,
                fsid: 0,
                pseudo_dev: dev,
                dev,
                locks: locks.entry(dev).or_default().clone(),
                fs,
            }));
        }

        let mut next_fsid = 1;
        for fs in lowers {
            let dev = fs.device_id();
            let fsid = *fsids.entry(dev).or_insert_with(|| {
                let fsid = next_fsid;
                next_fsid += 1;
                fsid
            });

            let pseudo_dev = if fsid > 0 {
                pseudo_dev_base + fsid as u64
            } else {
                dev
            };

            layers.push(Arc::new(Layer {
                index: layers.len(),
                role: LayerRole::Lower,
                fsid,
                pseudo_dev,
                dev,
                locks: locks.entry(dev).or_default().clone(),
                fs,
            }));
        }

        let same_fs = locks.len() == 1;
        tracing::debug!(layers = layers.len(), same_fs, "built layer stack");

        Ok(Self { layers, same_fs })
    }
}

impl InodeLocks {
    fn get(&self, ino: u64) -> Arc<Mutex<()>> {
        self.locks.entry(ino).or_default().clone()
    }

    /// Drops the table entry if nobody holds or waits on it.
    fn release(&self, ino: u64) {
        self.locks
            .remove_if(&ino, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl LayerRegistry for StaticLayerRegistry {
    fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    fn same_filesystem(&self) -> bool {
        self.same_fs
    }
}

impl Drop for InodeLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(self.ino);
    }
}

impl fmt::Debug for InodeLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InodeLockGuard").field("ino", &self.ino).finish()
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("index", &self.index)
            .field("role", &self.role)
            .field("fsid", &self.fsid)
            .field("pseudo_dev", &self.pseudo_dev)
            .field("dev", &self.dev)
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
