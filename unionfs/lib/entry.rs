use std::sync::Arc;

use getset::Getters;

use crate::{OverlayInode, RealInode};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A resolved path entry: the overlay inode plus the lower inodes path resolution found under it.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct OverlayEntry {
    /// The overlay inode.
    inode: Arc<OverlayInode>,

    /// Lower inodes from the topmost lower layer down. More than one only for merged directories.
    lower_stack: Vec<RealInode>,
}

/// How an entry is composed from its layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathType {
    /// Has an upper reference.
    pub upper: bool,

    /// Combines content from more than one layer.
    pub merge: bool,

    /// Upper entry with a lower copy-up origin.
    pub origin: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayEntry {
    /// Creates an entry with an explicit lower stack.
    pub fn new(inode: Arc<OverlayInode>, lower_stack: Vec<RealInode>) -> Self {
        Self { inode, lower_stack }
    }

    /// Creates an entry whose lower stack is the inode's own lower reference.
    pub fn from_inode(inode: Arc<OverlayInode>) -> Self {
        let lower_stack = inode.get_lower().iter().cloned().collect();
        Self { inode, lower_stack }
    }

    /// The topmost lower inode.
    pub fn lower(&self) -> Option<&RealInode> {
        self.lower_stack.first().or(self.inode.get_lower().as_ref())
    }

    /// Number of lower inodes under this entry.
    pub fn num_lower(&self) -> usize {
        self.lower_stack.len()
    }

    /// Classifies the entry.
    pub fn path_type(&self) -> PathType {
        let upper = self.inode.has_upper();
        let num_lower = self.num_lower();

        if upper {
            PathType {
                upper,
                merge: num_lower > 0 && self.inode.is_dir(),
                origin: num_lower > 0,
            }
        } else {
            PathType {
                upper,
                merge: num_lower > 1,
                origin: false,
            }
        }
    }
}
