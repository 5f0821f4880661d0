use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use getset::{CopyGetters, Getters};

use crate::{
    AccessMask, Credentials, InodeLockGuard, Layer, ModeType, OvlResult, SetAttr, Stat,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How `setxattr` treats an existing attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XattrFlags {
    /// Create or replace.
    #[default]
    Any,

    /// Fail if the attribute exists.
    Create,

    /// Fail if the attribute does not exist.
    Replace,
}

/// Which POSIX ACL to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclKind {
    /// The access ACL.
    Access,

    /// The default ACL of a directory.
    Default,
}

/// Identity of a real inode: its device id and inode number on that device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct RealInodeKey {
    /// Device id of the real filesystem.
    dev: u64,

    /// Inode number on that filesystem.
    ino: u64,
}

/// A borrowed reference to an inode on one layer.
///
/// The overlay never owns a real inode's lifecycle. It only holds the layer and the inode number,
/// and routes every operation to the layer's filesystem.
#[derive(Clone, Getters, CopyGetters)]
pub struct RealInode {
    /// The layer the inode lives on.
    #[getset(get = "pub with_prefix")]
    layer: Arc<Layer>,

    /// Inode number on the layer's filesystem.
    #[getset(get_copy = "pub with_prefix")]
    ino: u64,

    /// File kind.
    #[getset(get_copy = "pub with_prefix")]
    kind: ModeType,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Operations the overlay needs from a real filesystem backing one of its layers.
///
/// Every call takes the credentials it acts under. Storage is entirely the implementor's concern.
#[async_trait]
pub trait RealFileSystem: Send + Sync + 'static {
    /// Device id of this filesystem.
    fn device_id(&self) -> u64;

    /// Whether POSIX ACLs are supported.
    fn supports_acl(&self) -> bool {
        false
    }

    /// Reads the attributes of an inode.
    async fn getattr(&self, ino: u64, creds: &Credentials) -> OvlResult<Stat>;

    /// Applies an attribute change and returns the resulting attributes.
    async fn setattr(&self, ino: u64, change: &SetAttr, creds: &Credentials) -> OvlResult<Stat>;

    /// Checks access to an inode.
    ///
    /// If `mask` carries [`AccessMask::NOT_BLOCK`] and the check cannot complete without waiting,
    /// the implementation returns `OvlError::RetryBlocking`.
    async fn permission(&self, ino: u64, mask: AccessMask, creds: &Credentials) -> OvlResult<()>;

    /// Reads an extended attribute.
    async fn getxattr(&self, ino: u64, name: &str, creds: &Credentials) -> OvlResult<Vec<u8>>;

    /// Writes an extended attribute.
    async fn setxattr(
        &self,
        ino: u64,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
        creds: &Credentials,
    ) -> OvlResult<()>;

    /// Removes an extended attribute.
    async fn removexattr(&self, ino: u64, name: &str, creds: &Credentials) -> OvlResult<()>;

    /// Lists extended attribute names as NUL-terminated entries packed back to back.
    async fn listxattr(&self, ino: u64, creds: &Credentials) -> OvlResult<Vec<u8>>;

    /// Reads a POSIX ACL, if one is set.
    async fn get_acl(
        &self,
        ino: u64,
        kind: AclKind,
        creds: &Credentials,
    ) -> OvlResult<Option<Vec<u8>>>;

    /// Reads the target of a symbolic link.
    async fn readlink(&self, ino: u64, creds: &Credentials) -> OvlResult<PathBuf>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RealInodeKey {
    /// Creates a new key.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }
}

impl RealInode {
    /// Creates a reference to inode `ino` on `layer`.
    pub fn new(layer: Arc<Layer>, ino: u64, kind: ModeType) -> Self {
        Self { layer, ino, kind }
    }

    /// The identity key of this inode.
    pub fn key(&self) -> RealInodeKey {
        RealInodeKey::new(self.layer.get_dev(), self.ino)
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == ModeType::Directory
    }

    /// Returns true if the inode lives on the upper layer.
    pub fn is_upper(&self) -> bool {
        self.layer.is_upper()
    }

    /// Acquires the inode's exclusive lock.
    pub async fn lock(&self) -> InodeLockGuard {
        self.layer.lock_inode(self.ino).await
    }

    /// Tries to acquire the inode's exclusive lock without waiting.
    pub fn try_lock(&self) -> Option<InodeLockGuard> {
        self.layer.try_lock_inode(self.ino)
    }

    /// Reads the inode's attributes.
    pub async fn getattr(&self, creds: &Credentials) -> OvlResult<Stat> {
        self.layer.get_fs().getattr(self.ino, creds).await
    }

    /// Applies an attribute change.
    pub async fn setattr(&self, change: &SetAttr, creds: &Credentials) -> OvlResult<Stat> {
        self.layer.get_fs().setattr(self.ino, change, creds).await
    }

    /// Checks access.
    pub async fn permission(&self, mask: AccessMask, creds: &Credentials) -> OvlResult<()> {
        self.layer.get_fs().permission(self.ino, mask, creds).await
    }

    /// Reads an extended attribute.
    pub async fn getxattr(&self, name: &str, creds: &Credentials) -> OvlResult<Vec<u8>> {
        self.layer.get_fs().getxattr(self.ino, name, creds).await
    }

    /// Writes an extended attribute.
    pub async fn setxattr(
        &self,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
        creds: &Credentials,
    ) -> OvlResult<()> {
        self.layer
            .get_fs()
            .setxattr(self.ino, name, value, flags, creds)
            .await
    }

    /// Removes an extended attribute.
    pub async fn removexattr(&self, name: &str, creds: &Credentials) -> OvlResult<()> {
        self.layer.get_fs().removexattr(self.ino, name, creds).await
    }

    /// Lists extended attribute names in raw form.
    pub async fn listxattr(&self, creds: &Credentials) -> OvlResult<Vec<u8>> {
        self.layer.get_fs().listxattr(self.ino, creds).await
    }

    /// Reads a POSIX ACL.
    pub async fn get_acl(&self, kind: AclKind, creds: &Credentials) -> OvlResult<Option<Vec<u8>>> {
        self.layer.get_fs().get_acl(self.ino, kind, creds).await
    }

    /// Reads a symlink target.
    pub async fn readlink(&self, creds: &Credentials) -> OvlResult<PathBuf> {
        self.layer.get_fs().readlink(self.ino, creds).await
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for RealInodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

impl PartialEq for RealInode {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RealInode {}

impl fmt::Debug for RealInode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealInode")
            .field("layer", &self.layer.get_index())
            .field("ino", &self.ino)
            .field("kind", &self.kind)
            .finish()
    }
}
