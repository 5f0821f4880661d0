use std::ops::{BitOr, BitOrAssign};

use getset::{CopyGetters, Getters};

use crate::{InodeAttrs, ModeType, OvlError, OvlResult, SetAttr};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The identity an operation runs under.
///
/// The overlay never switches identity implicitly. Every call into a real layer takes the
/// credentials it should act under, so a delegated call uses the mounter's credentials for exactly
/// that call and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct Credentials {
    /// Effective user id.
    #[getset(get_copy = "pub with_prefix")]
    uid: u32,

    /// Effective group id.
    #[getset(get_copy = "pub with_prefix")]
    gid: u32,

    /// Supplementary groups.
    #[getset(get = "pub with_prefix")]
    groups: Vec<u32>,

    /// Holds administrative privilege (bypasses discretionary checks, sees `trusted.*`).
    #[getset(get_copy = "pub with_prefix")]
    privileged: bool,
}

/// The access being requested from a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessMask(u32);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Credentials {
    /// Credentials of the current process, as reported by the OS.
    pub fn current() -> Self {
        let uid = uzers::get_effective_uid();
        let gid = uzers::get_effective_gid();
        Self {
            uid,
            gid,
            groups: vec![gid],
            privileged: uid == 0,
        }
    }

    /// Credentials of the superuser.
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            groups: vec![0],
            privileged: true,
        }
    }

    /// Credentials of an unprivileged user.
    pub fn user(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            groups: vec![gid],
            privileged: false,
        }
    }

    /// Adds supplementary groups.
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = u32>) -> Self {
        for group in groups {
            if !self.groups.contains(&group) {
                self.groups.push(group);
            }
        }
        self
    }

    /// Returns true if the caller is a member of `gid`.
    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

impl AccessMask {
    /// Execute or search.
    pub const EXEC: AccessMask = AccessMask(0x01);

    /// Write.
    pub const WRITE: AccessMask = AccessMask(0x02);

    /// Read.
    pub const READ: AccessMask = AccessMask(0x04);

    /// Append only.
    pub const APPEND: AccessMask = AccessMask(0x08);

    /// The caller is on a path that must not suspend.
    pub const NOT_BLOCK: AccessMask = AccessMask(0x80);

    /// An empty mask.
    pub const fn empty() -> Self {
        AccessMask(0)
    }

    /// Returns true if every bit of `other` is set.
    pub fn contains(&self, other: AccessMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set.
    pub fn intersects(&self, other: AccessMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: AccessMask) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: AccessMask) {
        self.0 &= !other.0;
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks `mask` against the owner, group and other permission bits of `attrs`.
///
/// Privileged callers may read and write anything, and may execute anything that has at least
/// one execute bit or is a directory.
pub fn generic_permission(
    attrs: &InodeAttrs,
    mask: AccessMask,
    creds: &Credentials,
) -> OvlResult<()> {
    let wanted = mask.bits() & (AccessMask::READ | AccessMask::WRITE | AccessMask::EXEC).bits();
    let perms = attrs.get_mode().get_perms();

    let granted = if creds.uid == attrs.get_uid() {
        (perms >> 6) & 0o7
    } else if creds.in_group(attrs.get_gid()) {
        (perms >> 3) & 0o7
    } else {
        perms & 0o7
    };

    if wanted & !granted == 0 {
        return Ok(());
    }

    if creds.privileged {
        let needs_exec = wanted & AccessMask::EXEC.bits() != 0;
        if !needs_exec || attrs.is_dir() || perms & 0o111 != 0 {
            return Ok(());
        }
    }

    Err(OvlError::AccessDenied)
}

/// Advisory ownership check run before an attribute change reaches any real layer.
///
/// Changing the owner needs privilege. Changing the group needs ownership and membership of the
/// new group. Changing the mode or setting explicit timestamps needs ownership.
pub fn setattr_prepare(
    attrs: &InodeAttrs,
    change: &SetAttr,
    creds: &Credentials,
) -> OvlResult<()> {
    if creds.privileged {
        return Ok(());
    }

    let is_owner = creds.uid == attrs.get_uid();

    if let Some(uid) = change.get_uid() {
        if !(is_owner && uid == attrs.get_uid()) {
            return Err(OvlError::NotPermitted(format!("chown to {}", uid)));
        }
    }

    if let Some(gid) = change.get_gid() {
        if !(is_owner && (gid == attrs.get_gid() || creds.in_group(gid))) {
            return Err(OvlError::NotPermitted(format!("chgrp to {}", gid)));
        }
    }

    if change.get_mode().is_some() && !is_owner {
        return Err(OvlError::NotPermitted("chmod by non-owner".to_string()));
    }

    if change.sets_times() && !is_owner {
        return Err(OvlError::NotPermitted("set times by non-owner".to_string()));
    }

    if change.get_size().is_some() && attrs.get_mode().get_type() == Some(ModeType::Directory) {
        return Err(OvlError::InvalidArgument("truncate a directory".to_string()));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl BitOr for AccessMask {
    type Output = AccessMask;

    fn bitor(self, rhs: AccessMask) -> AccessMask {
        AccessMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessMask {
    fn bitor_assign(&mut self, rhs: AccessMask) {
        self.0 |= rhs.0;
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::current()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{Mode, Stat};

    use super::*;

    fn attrs(kind: ModeType, perms: u32, uid: u32, gid: u32) -> InodeAttrs {
        let stat = Stat::builder()
            .ino(1)
            .mode(Mode::new(kind, perms))
            .uid(uid)
            .gid(gid)
            .build();
        InodeAttrs::from(&stat)
    }

    #[test]
    fn test_access_mask_ops() {
        let mut mask = AccessMask::WRITE | AccessMask::APPEND;
        assert!(mask.contains(AccessMask::WRITE));
        assert!(!mask.contains(AccessMask::READ));

        mask.remove(AccessMask::WRITE | AccessMask::APPEND);
        mask |= AccessMask::READ;
        assert_eq!(mask, AccessMask::READ);
    }

    #[test]
    fn test_generic_permission_owner_group_other() {
        let file = attrs(ModeType::File, 0o640, 1000, 100);

        let owner = Credentials::user(1000, 1000);
        let member = Credentials::user(2000, 2000).with_groups([100]);
        let other = Credentials::user(3000, 3000);

        assert!(generic_permission(&file, AccessMask::WRITE, &owner).is_ok());
        assert!(generic_permission(&file, AccessMask::READ, &member).is_ok());
        assert!(matches!(
            generic_permission(&file, AccessMask::WRITE, &member),
            Err(OvlError::AccessDenied)
        ));
        assert!(matches!(
            generic_permission(&file, AccessMask::READ, &other),
            Err(OvlError::AccessDenied)
        ));
    }

    #[test]
    fn test_generic_permission_privileged() {
        let file = attrs(ModeType::File, 0o000, 1000, 1000);
        let dir = attrs(ModeType::Directory, 0o000, 1000, 1000);
        let root = Credentials::root();

        assert!(generic_permission(&file, AccessMask::READ | AccessMask::WRITE, &root).is_ok());
        assert!(generic_permission(&file, AccessMask::EXEC, &root).is_err());
        assert!(generic_permission(&dir, AccessMask::EXEC, &root).is_ok());
    }

    #[test]
    fn test_generic_permission_ignores_non_access_bits() {
        let file = attrs(ModeType::File, 0o444, 1000, 1000);
        let owner = Credentials::user(1000, 1000);
        assert!(
            generic_permission(&file, AccessMask::READ | AccessMask::NOT_BLOCK, &owner).is_ok()
        );
    }

    #[test]
    fn test_setattr_prepare() {
        let file = attrs(ModeType::File, 0o644, 1000, 1000);
        let owner = Credentials::user(1000, 1000).with_groups([50]);
        let other = Credentials::user(2000, 2000);

        assert!(setattr_prepare(&file, &SetAttr::builder().mode(0o600).build(), &owner).is_ok());
        assert!(setattr_prepare(&file, &SetAttr::builder().gid(50).build(), &owner).is_ok());
        assert!(matches!(
            setattr_prepare(&file, &SetAttr::builder().gid(60).build(), &owner),
            Err(OvlError::NotPermitted(_))
        ));
        assert!(matches!(
            setattr_prepare(&file, &SetAttr::builder().uid(0).build(), &owner),
            Err(OvlError::NotPermitted(_))
        ));
        assert!(matches!(
            setattr_prepare(&file, &SetAttr::builder().mode(0o777).build(), &other),
            Err(OvlError::NotPermitted(_))
        ));
        assert!(setattr_prepare(
            &file,
            &SetAttr::builder().uid(0).build(),
            &Credentials::root()
        )
        .is_ok());
    }
}
