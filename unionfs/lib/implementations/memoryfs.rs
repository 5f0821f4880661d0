use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    defaults::TRUSTED_XATTR_PREFIX, generic_permission, AccessMask, AclKind, Credentials,
    InodeAttrs, Mode, ModeType, OvlError, OvlResult, RealFileSystem, SetAttr, Stat, XattrFlags,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory real filesystem.
///
/// Holds a flat table of inodes with attributes, extended attributes and ACLs. There is no
/// directory tree: callers address inodes by number. Useful as a layer in tests and as a
/// reference for implementing [`RealFileSystem`].
#[derive(Debug)]
pub struct MemoryRealFs {
    /// Device id reported in every stat.
    dev: u64,

    /// Inode table.
    inodes: RwLock<HashMap<u64, MemoryInode>>,

    /// Next inode number to hand out.
    next_ino: AtomicU64,

    /// Rejects every modification when set.
    read_only: AtomicBool,

    /// Whether POSIX ACLs are supported.
    acl: bool,
}

/// One inode of a [`MemoryRealFs`].
#[derive(Debug, Clone)]
struct MemoryInode {
    stat: Stat,
    xattrs: BTreeMap<String, Vec<u8>>,
    target: Option<PathBuf>,
    acls: HashMap<AclKind, Vec<u8>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryRealFs {
    /// Creates an empty filesystem with device id `dev`.
    pub fn new(dev: u64) -> Self {
        Self {
            dev,
            inodes: RwLock::new(HashMap::new()),
            next_ino: AtomicU64::new(1),
            read_only: AtomicBool::new(false),
            acl: false,
        }
    }

    /// Enables POSIX ACL support.
    pub fn with_acl(mut self) -> Self {
        self.acl = true;
        self
    }

    /// Starts inode numbering at `ino`.
    pub fn with_first_ino(mut self, ino: u64) -> Self {
        self.next_ino = AtomicU64::new(ino);
        self
    }

    /// Makes the filesystem refuse (or accept again) modifications.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// Returns true if modifications are refused.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Creates an inode and returns its number.
    pub async fn create(&self, kind: ModeType, perms: u32, uid: u32, gid: u32) -> u64 {
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        let stat = Stat::builder()
            .dev(self.dev)
            .ino(ino)
            .mode(Mode::new(kind, perms))
            .nlink(if kind == ModeType::Directory { 2 } else { 1 })
            .uid(uid)
            .gid(gid)
            .build();

        self.inodes.write().await.insert(ino, MemoryInode::new(stat));
        ino
    }

    /// Creates a symbolic link to `target` and returns its number.
    pub async fn create_symlink(&self, target: impl AsRef<Path>, uid: u32, gid: u32) -> u64 {
        let ino = self.create(ModeType::Symlink, 0o777, uid, gid).await;
        let target = target.as_ref().to_path_buf();

        let mut inodes = self.inodes.write().await;
        if let Some(inode) = inodes.get_mut(&ino) {
            inode.stat.size = target.as_os_str().len() as u64;
            inode.target = Some(target);
        }
        ino
    }

    /// Creates an inode with the attributes of `stat` (apart from device, number and link count)
    /// and returns its number.
    pub async fn create_from(&self, stat: &Stat) -> u64 {
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        let mut stat = stat.clone();
        stat.dev = self.dev;
        stat.ino = ino;
        stat.nlink = if stat.is_dir() { 2 } else { 1 };

        self.inodes.write().await.insert(ino, MemoryInode::new(stat));
        ino
    }

    /// Adds a hard link to `ino` and returns the new link count.
    pub async fn link(&self, ino: u64) -> OvlResult<u32> {
        self.modify(ino, |inode| {
            inode.stat.nlink += 1;
            inode.stat.ctime = chrono::Utc::now();
            Ok(inode.stat.nlink)
        })
        .await
    }

    /// Drops a hard link of `ino` and returns the new link count. The inode stays addressable.
    pub async fn unlink(&self, ino: u64) -> OvlResult<u32> {
        self.modify(ino, |inode| {
            inode.stat.nlink = inode.stat.nlink.saturating_sub(1);
            inode.stat.ctime = chrono::Utc::now();
            Ok(inode.stat.nlink)
        })
        .await
    }

    /// Sets the size of `ino`, as a write would.
    pub async fn set_size(&self, ino: u64, size: u64) -> OvlResult<()> {
        let change = SetAttr::builder().size(size).build();
        self.modify(ino, |inode| {
            change.apply_to(&mut inode.stat);
            Ok(())
        })
        .await
    }

    /// Stores an ACL for `ino`.
    pub async fn set_acl(&self, ino: u64, kind: AclKind, value: &[u8]) -> OvlResult<()> {
        if !self.acl {
            return Err(OvlError::NotSupported("acl".to_string()));
        }
        self.modify(ino, |inode| {
            inode.acls.insert(kind, value.to_vec());
            Ok(())
        })
        .await
    }

    /// Returns the number of inodes.
    pub async fn len(&self) -> usize {
        self.inodes.read().await.len()
    }

    /// Returns true if no inode exists.
    pub async fn is_empty(&self) -> bool {
        self.inodes.read().await.is_empty()
    }

    async fn modify<T>(
        &self,
        ino: u64,
        f: impl FnOnce(&mut MemoryInode) -> OvlResult<T>,
    ) -> OvlResult<T> {
        if self.is_read_only() {
            return Err(OvlError::ReadOnlyFilesystem);
        }

        let mut inodes = self.inodes.write().await;
        let inode = inodes.get_mut(&ino).ok_or(OvlError::NotFound(ino))?;
        f(inode)
    }

    async fn read<T>(&self, ino: u64, f: impl FnOnce(&MemoryInode) -> OvlResult<T>) -> OvlResult<T> {
        let inodes = self.inodes.read().await;
        let inode = inodes.get(&ino).ok_or(OvlError::NotFound(ino))?;
        f(inode)
    }
}

impl MemoryInode {
    fn new(stat: Stat) -> Self {
        Self {
            stat,
            xattrs: BTreeMap::new(),
            target: None,
            acls: HashMap::new(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// `trusted.*` attributes are only visible to privileged callers.
fn check_trusted(name: &str, write: bool, creds: &Credentials) -> OvlResult<()> {
    if name.starts_with(TRUSTED_XATTR_PREFIX) && !creds.get_privileged() {
        return Err(if write {
            OvlError::NotPermitted(name.to_string())
        } else {
            OvlError::NoAttribute(name.to_string())
        });
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RealFileSystem for MemoryRealFs {
    fn device_id(&self) -> u64 {
        self.dev
    }

    fn supports_acl(&self) -> bool {
        self.acl
    }

    async fn getattr(&self, ino: u64, _creds: &Credentials) -> OvlResult<Stat> {
        self.read(ino, |inode| Ok(inode.stat.clone())).await
    }

    async fn setattr(&self, ino: u64, change: &SetAttr, _creds: &Credentials) -> OvlResult<Stat> {
        self.modify(ino, |inode| {
            if change.get_size().is_some() && inode.stat.is_dir() {
                return Err(OvlError::InvalidArgument("truncate a directory".to_string()));
            }
            change.apply_to(&mut inode.stat);
            Ok(inode.stat.clone())
        })
        .await
    }

    async fn permission(&self, ino: u64, mask: AccessMask, creds: &Credentials) -> OvlResult<()> {
        let attrs = if mask.contains(AccessMask::NOT_BLOCK) {
            let inodes = self.inodes.try_read().map_err(|_| OvlError::RetryBlocking)?;
            let inode = inodes.get(&ino).ok_or(OvlError::NotFound(ino))?;
            InodeAttrs::from(&inode.stat)
        } else {
            self.read(ino, |inode| Ok(InodeAttrs::from(&inode.stat)))
                .await?
        };

        if mask.intersects(AccessMask::WRITE | AccessMask::APPEND)
            && self.is_read_only()
            && !attrs.get_mode().get_type().is_some_and(|kind| kind.is_special())
        {
            return Err(OvlError::ReadOnlyFilesystem);
        }

        generic_permission(&attrs, mask, creds)
    }

    async fn getxattr(&self, ino: u64, name: &str, creds: &Credentials) -> OvlResult<Vec<u8>> {
        check_trusted(name, false, creds)?;
        self.read(ino, |inode| {
            inode
                .xattrs
                .get(name)
                .cloned()
                .ok_or_else(|| OvlError::NoAttribute(name.to_string()))
        })
        .await
    }

    async fn setxattr(
        &self,
        ino: u64,
        name: &str,
        value: &[u8],
        flags: XattrFlags,
        creds: &Credentials,
    ) -> OvlResult<()> {
        check_trusted(name, true, creds)?;
        self.modify(ino, |inode| {
            let exists = inode.xattrs.contains_key(name);
            match flags {
                XattrFlags::Create if exists => {
                    return Err(OvlError::InvalidArgument(format!("{} exists", name)))
                }
                XattrFlags::Replace if !exists => {
                    return Err(OvlError::NoAttribute(name.to_string()))
                }
                _ => {}
            }

            inode.xattrs.insert(name.to_string(), value.to_vec());
            inode.stat.ctime = chrono::Utc::now();
            Ok(())
        })
        .await
    }

    async fn removexattr(&self, ino: u64, name: &str, creds: &Credentials) -> OvlResult<()> {
        check_trusted(name, true, creds)?;
        self.modify(ino, |inode| {
            inode
                .xattrs
                .remove(name)
                .ok_or_else(|| OvlError::NoAttribute(name.to_string()))?;
            inode.stat.ctime = chrono::Utc::now();
            Ok(())
        })
        .await
    }

    async fn listxattr(&self, ino: u64, _creds: &Credentials) -> OvlResult<Vec<u8>> {
        self.read(ino, |inode| {
            let mut raw = Vec::new();
            for name in inode.xattrs.keys() {
                raw.extend_from_slice(name.as_bytes());
                raw.push(0);
            }
            Ok(raw)
        })
        .await
    }

    async fn get_acl(
        &self,
        ino: u64,
        kind: AclKind,
        _creds: &Credentials,
    ) -> OvlResult<Option<Vec<u8>>> {
        if !self.acl {
            return Err(OvlError::NotSupported("acl".to_string()));
        }
        self.read(ino, |inode| Ok(inode.acls.get(&kind).cloned()))
            .await
    }

    async fn readlink(&self, ino: u64, _creds: &Credentials) -> OvlResult<PathBuf> {
        self.read(ino, |inode| {
            inode.target.clone().ok_or(OvlError::NotASymlink(ino))
        })
        .await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
