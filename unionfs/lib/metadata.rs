use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const S_IFMT: u32 = 0o170000; // bit mask for the file type bit field
const S_ISUID: u32 = 0o4000; // set-user-id
const S_ISGID: u32 = 0o2000; // set-group-id
const S_IXGRP: u32 = 0o010; // group execute, distinguishes sgid from mandatory locking
const S_IALLUGO: u32 = 0o7777; // permission bits including suid, sgid and sticky

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A Unix-style file mode that combines file type and permission bits.
///
/// ```text
/// Bits  Description
/// ----  -----------
/// 15-12 File type (S_IFMT)
/// 11    Set-user-id
/// 10    Set-group-id
/// 9     Sticky
/// 8-0   rwx for user, group and other
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(u32);

/// The kind of a file, as encoded in the type bits of its mode.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeType {
    /// Regular file
    File = 0o100000,

    /// Directory
    Directory = 0o040000,

    /// Symbolic link
    Symlink = 0o120000,

    /// Character device
    CharDevice = 0o020000,

    /// Block device
    BlockDevice = 0o060000,

    /// Named pipe
    Fifo = 0o010000,

    /// Unix domain socket
    Socket = 0o140000,
}

/// Attributes of a real or overlay inode, as returned by `getattr`.
///
/// An overlay `getattr` returns the real inode's attributes with `dev`, `ino` and `nlink`
/// replaced by their unified values.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct Stat {
    /// Device id.
    #[builder(default)]
    pub dev: u64,

    /// Inode number.
    pub ino: u64,

    /// File type and permission bits.
    pub mode: Mode,

    /// Hard link count.
    #[builder(default = 1)]
    pub nlink: u32,

    /// Owner user id.
    #[builder(default)]
    pub uid: u32,

    /// Owner group id.
    #[builder(default)]
    pub gid: u32,

    /// Device number for special files.
    #[builder(default)]
    pub rdev: u64,

    /// Size in bytes.
    #[builder(default)]
    pub size: u64,

    /// Number of 512-byte blocks allocated.
    #[builder(default)]
    pub blocks: u64,

    /// Last access time.
    #[builder(default = Utc::now())]
    pub atime: DateTime<Utc>,

    /// Last modification time.
    #[builder(default = Utc::now())]
    pub mtime: DateTime<Utc>,

    /// Last status change time.
    #[builder(default = Utc::now())]
    pub ctime: DateTime<Utc>,
}

/// A requested attribute change. Fields left as `None` are not changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder, CopyGetters, Getters)]
pub struct SetAttr {
    /// New permission bits.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub with_prefix")]
    mode: Option<u32>,

    /// New owner.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub with_prefix")]
    uid: Option<u32>,

    /// New group.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub with_prefix")]
    gid: Option<u32>,

    /// New size.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub with_prefix")]
    size: Option<u64>,

    /// Explicit access time.
    #[builder(default, setter(strip_option))]
    #[getset(get = "pub with_prefix")]
    atime: Option<DateTime<Utc>>,

    /// Explicit modification time.
    #[builder(default, setter(strip_option))]
    #[getset(get = "pub with_prefix")]
    mtime: Option<DateTime<Utc>>,

    /// Clear the set-user-id bit.
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    kill_suid: bool,

    /// Clear the set-group-id bit.
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    kill_sgid: bool,
}

/// The attributes an overlay inode caches from its real inode.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters, Getters)]
pub struct InodeAttrs {
    /// File type and permission bits.
    #[getset(get_copy = "pub with_prefix")]
    mode: Mode,

    /// Owner user id.
    #[getset(get_copy = "pub with_prefix")]
    uid: u32,

    /// Owner group id.
    #[getset(get_copy = "pub with_prefix")]
    gid: u32,

    /// Device number for special files.
    #[getset(get_copy = "pub with_prefix")]
    rdev: u64,

    /// Last access time.
    #[getset(get = "pub with_prefix")]
    atime: DateTime<Utc>,

    /// Last modification time.
    #[getset(get = "pub with_prefix")]
    mtime: DateTime<Utc>,

    /// Last status change time.
    #[getset(get = "pub with_prefix")]
    ctime: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Mode {
    /// Creates a mode from a file type and permission bits.
    pub fn new(kind: ModeType, perms: u32) -> Self {
        Self(kind as u32 | (perms & S_IALLUGO))
    }

    /// Gets the file type, if the type bits encode a known type.
    pub fn get_type(&self) -> Option<ModeType> {
        ModeType::from_bits(self.0)
    }

    /// Gets the permission bits, including set-id and sticky bits.
    pub fn get_perms(&self) -> u32 {
        self.0 & S_IALLUGO
    }

    /// Replaces the permission bits, keeping the file type.
    pub fn set_perms(&mut self, perms: u32) {
        self.0 = (self.0 & S_IFMT) | (perms & S_IALLUGO);
    }

    /// Returns the raw mode value.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if the set-user-id bit is set.
    pub fn is_setuid(&self) -> bool {
        self.0 & S_ISUID != 0
    }

    /// Returns true if the set-group-id bit is set together with group execute.
    pub fn is_setgid(&self) -> bool {
        self.0 & (S_ISGID | S_IXGRP) == (S_ISGID | S_IXGRP)
    }

    /// Clears the set-user-id bit.
    pub fn clear_setuid(&mut self) {
        self.0 &= !S_ISUID;
    }

    /// Clears the set-group-id bit.
    pub fn clear_setgid(&mut self) {
        self.0 &= !S_ISGID;
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.get_type() == Some(ModeType::Directory)
    }
}

impl ModeType {
    /// Decodes the type bits of a raw mode.
    pub fn from_bits(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            0o100000 => Some(ModeType::File),
            0o040000 => Some(ModeType::Directory),
            0o120000 => Some(ModeType::Symlink),
            0o020000 => Some(ModeType::CharDevice),
            0o060000 => Some(ModeType::BlockDevice),
            0o010000 => Some(ModeType::Fifo),
            0o140000 => Some(ModeType::Socket),
            _ => None,
        }
    }

    /// Devices, pipes and sockets. Their data never lives on a layer, so they are never
    /// copied up for data access.
    pub fn is_special(&self) -> bool {
        matches!(
            self,
            ModeType::CharDevice | ModeType::BlockDevice | ModeType::Fifo | ModeType::Socket
        )
    }
}

impl Stat {
    /// Returns the file type encoded in the mode.
    pub fn kind(&self) -> Option<ModeType> {
        self.mode.get_type()
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

impl SetAttr {
    /// Drops the requested mode change. Used when the set-id bits are cleared implicitly.
    pub fn clear_mode(&mut self) {
        self.mode = None;
    }

    /// Returns true if explicit timestamps are requested.
    pub fn sets_times(&self) -> bool {
        self.atime.is_some() || self.mtime.is_some()
    }

    /// Returns true if nothing would change.
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
            && self.size.is_none()
            && !self.sets_times()
            && !self.kill_suid
            && !self.kill_sgid
    }

    /// Applies the change to a set of attributes. Real layers use this to implement `setattr`.
    pub fn apply_to(&self, stat: &mut Stat) {
        if let Some(perms) = self.mode {
            stat.mode.set_perms(perms);
        }
        if self.kill_suid {
            stat.mode.clear_setuid();
        }
        if self.kill_sgid {
            stat.mode.clear_setgid();
        }
        if let Some(uid) = self.uid {
            stat.uid = uid;
        }
        if let Some(gid) = self.gid {
            stat.gid = gid;
        }
        if let Some(size) = self.size {
            stat.size = size;
            stat.blocks = size.div_ceil(512);
        }
        if let Some(atime) = self.atime {
            stat.atime = atime;
        }
        if let Some(mtime) = self.mtime {
            stat.mtime = mtime;
        }
        stat.ctime = Utc::now();
    }
}

impl InodeAttrs {
    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<&Stat> for InodeAttrs {
    fn from(stat: &Stat) -> Self {
        Self {
            mode: stat.mode,
            uid: stat.uid,
            gid: stat.gid,
            rdev: stat.rdev,
            atime: stat.atime,
            mtime: stat.mtime,
            ctime: stat.ctime,
        }
    }
}

impl From<u32> for Mode {
    fn from(mode: u32) -> Self {
        Self(mode)
    }
}

impl From<Mode> for u32 {
    fn from(mode: Mode) -> Self {
        mode.0
    }
}

impl std::fmt::Display for ModeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModeType::File => "file",
            ModeType::Directory => "directory",
            ModeType::Symlink => "symlink",
            ModeType::CharDevice => "char device",
            ModeType::BlockDevice => "block device",
            ModeType::Fifo => "fifo",
            ModeType::Socket => "socket",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let type_char = match self.get_type() {
            Some(ModeType::File) => '-',
            Some(ModeType::Directory) => 'd',
            Some(ModeType::Symlink) => 'l',
            Some(ModeType::CharDevice) => 'c',
            Some(ModeType::BlockDevice) => 'b',
            Some(ModeType::Fifo) => 'p',
            Some(ModeType::Socket) => 's',
            None => '?',
        };

        let perms = self.get_perms();
        let bit = |mask: u32, c: char| if perms & mask != 0 { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}{}{}{}{}{}",
            type_char,
            bit(0o400, 'r'),
            bit(0o200, 'w'),
            bit(0o100, 'x'),
            bit(0o040, 'r'),
            bit(0o020, 'w'),
            bit(0o010, 'x'),
            bit(0o004, 'r'),
            bit(0o002, 'w'),
            bit(0o001, 'x'),
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
