use crate::{
    defaults::{OVERLAY_XATTR_PREFIX, TRUSTED_XATTR_PREFIX},
    Credentials, OverlayEntry, OverlayInode, OvlError, OvlResult, XattrFlags,
};

use super::{real_of, OverlayFs};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayFs {
    pub(crate) async fn do_getxattr(
        &self,
        inode: &OverlayInode,
        name: &str,
        caller: &Credentials,
    ) -> OvlResult<Vec<u8>> {
        check_xattr_access(name, false, caller)?;
        real_of(inode)?.getxattr(name, &self.mounter).await
    }

    /// Sets (`Some`) or removes (`None`) an attribute on the upper inode.
    ///
    /// Removing an attribute from an entry that is not copied up first checks that the attribute
    /// exists on the lower inode, so a missing attribute fails without a copy-up.
    pub(crate) async fn do_xattr_set(
        &self,
        entry: &OverlayEntry,
        name: &str,
        value: Option<&[u8]>,
        flags: XattrFlags,
        caller: &Credentials,
    ) -> OvlResult<()> {
        check_xattr_access(name, true, caller)?;

        let inode = entry.get_inode();
        let _guard = self.write_access.want_write()?;

        let upper = inode.upper();
        if value.is_none() && upper.is_none() {
            real_of(inode)?.getxattr(name, &self.mounter).await?;
        }

        let upper = match upper {
            Some(upper) => upper,
            None => self.copy_up_reserved(entry, None).await?,
        };

        let _lock = upper.lock().await;
        match value {
            Some(value) => upper.setxattr(name, value, flags, &self.mounter).await,
            None => upper.removexattr(name, &self.mounter).await,
        }
    }

    pub(crate) async fn do_listxattr(
        &self,
        inode: &OverlayInode,
        caller: &Credentials,
    ) -> OvlResult<Vec<String>> {
        let raw = real_of(inode)?.listxattr(&self.mounter).await?;
        filter_xattr_list(&raw, caller.get_privileged())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Filters a raw attribute listing (NUL-terminated names, back to back).
///
/// Names under `trusted.overlay.` are always dropped. Other `trusted.` names are dropped unless
/// `privileged`. A listing whose last entry is not terminated, or that contains an empty or
/// non-UTF-8 name, is rejected with `InconsistentListing`.
pub fn filter_xattr_list(raw: &[u8], privileged: bool) -> OvlResult<Vec<String>> {
    let mut names = Vec::new();
    let mut rest = raw;

    while !rest.is_empty() {
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(OvlError::InconsistentListing)?;
        if len == 0 {
            return Err(OvlError::InconsistentListing);
        }

        let name =
            std::str::from_utf8(&rest[..len]).map_err(|_| OvlError::InconsistentListing)?;
        rest = &rest[len + 1..];

        if is_private_xattr(name) {
            continue;
        }

        if name.starts_with(TRUSTED_XATTR_PREFIX) && !privileged {
            continue;
        }

        names.push(name.to_string());
    }

    Ok(names)
}

fn is_private_xattr(name: &str) -> bool {
    name.starts_with(OVERLAY_XATTR_PREFIX)
}

/// Rejects names the caller may not touch through the overlay.
fn check_xattr_access(name: &str, write: bool, caller: &Credentials) -> OvlResult<()> {
    if is_private_xattr(name) {
        return Err(OvlError::NotSupported(name.to_string()));
    }

    if name.starts_with(TRUSTED_XATTR_PREFIX) && !caller.get_privileged() {
        return Err(if write {
            OvlError::NotPermitted(name.to_string())
        } else {
            OvlError::NoAttribute(name.to_string())
        });
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(names: &[&str]) -> Vec<u8> {
        names
            .iter()
            .flat_map(|name| name.bytes().chain(std::iter::once(0)))
            .collect()
    }

    #[test]
    fn test_filter_xattr_list() {
        let listing = raw(&["trusted.overlay.foo", "user.bar", "trusted.other"]);

        assert_eq!(filter_xattr_list(&listing, false).unwrap(), vec!["user.bar"]);
        assert_eq!(
            filter_xattr_list(&listing, true).unwrap(),
            vec!["user.bar", "trusted.other"]
        );
    }

    #[test]
    fn test_filter_xattr_list_empty() {
        assert!(filter_xattr_list(&[], true).unwrap().is_empty());
    }

    #[test]
    fn test_filter_xattr_list_inconsistent() {
        let mut listing = raw(&["user.a"]);
        listing.extend_from_slice(b"user.b");
        assert!(matches!(
            filter_xattr_list(&listing, true),
            Err(OvlError::InconsistentListing)
        ));

        assert!(matches!(
            filter_xattr_list(b"user.a\0\0", true),
            Err(OvlError::InconsistentListing)
        ));

        assert!(matches!(
            filter_xattr_list(b"user.\xff\0", true),
            Err(OvlError::InconsistentListing)
        ));
    }

    #[test]
    fn test_xattr_access() {
        let user = Credentials::user(1000, 1000);
        let root = Credentials::root();

        assert!(matches!(
            check_xattr_access("trusted.overlay.nlink", false, &root),
            Err(OvlError::NotSupported(_))
        ));
        assert!(matches!(
            check_xattr_access("trusted.foo", false, &user),
            Err(OvlError::NoAttribute(_))
        ));
        assert!(matches!(
            check_xattr_access("trusted.foo", true, &user),
            Err(OvlError::NotPermitted(_))
        ));
        assert!(check_xattr_access("trusted.foo", true, &root).is_ok());
        assert!(check_xattr_access("user.foo", true, &user).is_ok());
    }
}
