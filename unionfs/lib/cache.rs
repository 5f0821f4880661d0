use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::{OverlayInode, OvlResult, RealInodeKey};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Overlay inodes keyed by their governing real inode.
///
/// Each key maps to a creation barrier. The first caller for a key runs the constructor while
/// concurrent callers wait on the same barrier and receive the published inode.
#[derive(Debug)]
pub struct InodeCache {
    inodes: DashMap<RealInodeKey, Arc<OnceCell<Arc<OverlayInode>>>>,
    next_ino: AtomicU64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InodeCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            inodes: DashMap::new(),
            next_ino: AtomicU64::new(1),
        }
    }

    /// Returns the inode published for `key`, creating it with `create` if there is none.
    ///
    /// The flag is true for the one caller whose constructor ran. If the constructor fails, the
    /// error goes to that caller only and the next caller gets to try again.
    pub async fn find_or_create<F, Fut>(
        &self,
        key: RealInodeKey,
        create: F,
    ) -> OvlResult<(Arc<OverlayInode>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OvlResult<OverlayInode>>,
    {
        let cell = self.inodes.entry(key).or_default().clone();

        let mut created = false;
        let created_ref = &mut created;
        let result = cell
            .get_or_try_init(move || async move {
                *created_ref = true;
                create().await.map(Arc::new)
            })
            .await
            .cloned();

        match result {
            Ok(inode) => {
                if created {
                    tracing::debug!(%key, ino = inode.get_ino(), "published overlay inode");
                }
                Ok((inode, created))
            }
            Err(e) => {
                drop(cell);
                self.inodes
                    .remove_if(&key, |_, cell| !cell.initialized() && Arc::strong_count(cell) == 1);
                Err(e)
            }
        }
    }

    /// Returns the inode published for `key`, if any.
    pub fn lookup(&self, key: &RealInodeKey) -> Option<Arc<OverlayInode>> {
        self.inodes
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Removes `inode` from the cache. Does nothing if a different inode is published under its
    /// key or the inode was never published.
    pub fn evict(&self, inode: &OverlayInode) -> bool {
        let Some(key) = inode.get_key() else {
            return false;
        };

        self.inodes
            .remove_if(&key, |_, cell| {
                cell.get()
                    .is_some_and(|cached| std::ptr::eq(Arc::as_ptr(cached), inode))
            })
            .is_some()
    }

    /// Number of published keys.
    pub fn len(&self) -> usize {
        self.inodes.iter().filter(|cell| cell.initialized()).count()
    }

    /// Returns true if nothing is published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates a non-persistent overlay inode number.
    pub fn next_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for InodeCache {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
