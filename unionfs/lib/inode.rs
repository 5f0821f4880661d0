use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use getset::{CopyGetters, Getters};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::{InodeAttrs, ModeType, OvlError, OvlResult, RealInode, RealInodeKey, Stat};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// State bits of an overlay inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeFlags(u32);

/// The unified inode the overlay exposes for one logical file.
///
/// At least one of the upper and lower references is always present. The lower reference is fixed
/// at creation. The upper reference is attached once, when copy-up completes, and never changes
/// afterwards.
#[derive(Getters, CopyGetters)]
pub struct OverlayInode {
    /// The overlay's own inode number.
    #[getset(get_copy = "pub with_prefix")]
    ino: u64,

    /// File kind.
    #[getset(get_copy = "pub with_prefix")]
    kind: ModeType,

    /// The governing reference's identity. `None` for inodes that are not published in the cache.
    #[getset(get_copy = "pub with_prefix")]
    key: Option<RealInodeKey>,

    /// The lower reference, if any.
    #[getset(get = "pub with_prefix")]
    lower: Option<RealInode>,

    upper: RwLock<Option<RealInode>>,
    nlink: AtomicU32,
    flags: AtomicU32,
    attrs: RwLock<InodeAttrs>,
    copy_up_lock: Mutex<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InodeFlags {
    /// Backed by an index entry on the upper layer.
    pub const INDEXED: InodeFlags = InodeFlags(1 << 0);

    /// Upper directory that may hold entries with origin references.
    pub const IMPURE: InodeFlags = InodeFlags(1 << 1);

    /// Directory that may hide lower entries behind whiteouts.
    pub const HAS_WHITEOUTS: InodeFlags = InodeFlags(1 << 2);

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl OverlayInode {
    /// Creates an overlay inode. Fails if neither reference is given.
    pub fn new(
        ino: u64,
        key: Option<RealInodeKey>,
        upper: Option<RealInode>,
        lower: Option<RealInode>,
        nlink: u32,
        stat: &Stat,
    ) -> OvlResult<Self> {
        let kind = stat.kind().ok_or_else(|| {
            OvlError::InvalidArgument(format!("unknown file type {:o}", stat.mode.bits()))
        })?;

        if upper.is_none() && lower.is_none() {
            return Err(OvlError::InvalidArgument(
                "overlay inode needs an upper or a lower reference".to_string(),
            ));
        }

        Ok(Self {
            ino,
            kind,
            key,
            lower,
            upper: RwLock::new(upper),
            nlink: AtomicU32::new(nlink),
            flags: AtomicU32::new(0),
            attrs: RwLock::new(InodeAttrs::from(stat)),
            copy_up_lock: Mutex::new(()),
        })
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == ModeType::Directory
    }

    /// The upper reference, if copied up.
    pub fn upper(&self) -> Option<RealInode> {
        self.upper.read().clone()
    }

    /// The upper reference, without waiting on a concurrent copy-up.
    pub fn try_upper(&self) -> OvlResult<Option<RealInode>> {
        self.upper
            .try_read()
            .map(|upper| upper.clone())
            .ok_or(OvlError::RetryBlocking)
    }

    /// The reference operations go to: upper if present, else lower.
    pub fn real(&self) -> Option<RealInode> {
        self.upper().or_else(|| self.lower.clone())
    }

    /// Returns true once the inode has an upper reference.
    pub fn has_upper(&self) -> bool {
        self.upper.read().is_some()
    }

    /// Attaches the upper reference produced by copy-up. A second attach is ignored.
    pub fn attach_upper(&self, upper: RealInode) -> bool {
        let mut slot = self.upper.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(upper);
        true
    }

    /// The synthesized link count.
    pub fn nlink(&self) -> u32 {
        self.nlink.load(Ordering::Acquire)
    }

    /// Sets the synthesized link count.
    pub fn set_nlink(&self, nlink: u32) {
        self.nlink.store(nlink, Ordering::Release);
    }

    /// Increments the synthesized link count.
    pub fn inc_nlink(&self) {
        self.nlink.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the synthesized link count, stopping at zero.
    pub fn drop_nlink(&self) {
        let _ = self
            .nlink
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Returns true if `flag` is set.
    pub fn has_flag(&self, flag: InodeFlags) -> bool {
        self.flags.load(Ordering::Acquire) & flag.0 != 0
    }

    /// Sets `flag`.
    pub fn set_flag(&self, flag: InodeFlags) {
        self.flags.fetch_or(flag.0, Ordering::AcqRel);
    }

    /// Clears `flag`.
    pub fn clear_flag(&self, flag: InodeFlags) {
        self.flags.fetch_and(!flag.0, Ordering::AcqRel);
    }

    /// A snapshot of the cached attributes.
    pub fn attrs(&self) -> InodeAttrs {
        self.attrs.read().clone()
    }

    /// A snapshot of the cached attributes, without waiting on a writer.
    pub fn try_attrs(&self) -> OvlResult<InodeAttrs> {
        self.attrs
            .try_read()
            .map(|attrs| attrs.clone())
            .ok_or(OvlError::RetryBlocking)
    }

    /// Copies ownership, mode and timestamps from a real inode's attributes.
    pub fn copy_attrs_from(&self, stat: &Stat) {
        *self.attrs.write() = InodeAttrs::from(stat);
    }

    /// Serializes copy-up of this inode.
    pub(crate) fn copy_up_lock(&self) -> &Mutex<()> {
        &self.copy_up_lock
    }

    /// Checks that the references found by path resolution match the ones recorded here.
    ///
    /// With `strict`, a directory must also agree on which references are absent. Without it,
    /// `None` means unknown and is not compared.
    pub fn verify(
        &self,
        lower: Option<&RealInode>,
        upper: Option<&RealInode>,
        strict: bool,
    ) -> bool {
        let recorded_upper = self.upper();

        if self.is_dir() && strict {
            if lower.is_none() && self.lower.is_some() {
                return false;
            }
            if upper.is_none() && recorded_upper.is_some() {
                return false;
            }
        }

        if let Some(lower) = lower {
            if self.lower.as_ref() != Some(lower) {
                return false;
            }
        }

        if let Some(upper) = upper {
            if recorded_upper.as_ref() != Some(upper) {
                return false;
            }
        }

        true
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl std::ops::BitOr for InodeFlags {
    type Output = InodeFlags;

    fn bitor(self, rhs: InodeFlags) -> InodeFlags {
        InodeFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for OverlayInode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayInode")
            .field("ino", &self.ino)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("upper", &self.upper())
            .field("lower", &self.lower)
            .field("nlink", &self.nlink())
            .field("flags", &self.flags.load(Ordering::Relaxed))
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
