//! The persisted link-count correction.
//!
//! The upper inode's own link count only covers upper hardlinks, while the overlay reports the
//! union of upper hardlinks and lower hardlinks not yet copied up. The difference is stored as a
//! short tag in a private extended attribute on the index entry:
//!
//! ```text
//! U+2    union nlink is the upper nlink plus 2
//! L-1    union nlink is the lower nlink minus 1
//! ```
//!
//! Tags are written before the nlink-changing operation they describe, while the caller holds the
//! real inode's lock.

use std::{fmt, str::FromStr};

use crate::{
    defaults::{NLINK_TAG_MAX_LEN, OVERLAY_XATTR_NLINK},
    Credentials, OverlayInode, OvlError, OvlResult, RateLimit, RealInode, XattrFlags,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The real inode a tag's delta is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NlinkOrigin {
    /// Relative to the upper inode's link count.
    Upper,

    /// Relative to the lower inode's link count.
    Lower,
}

/// A parsed link-count tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlinkTag {
    /// The side the delta applies to.
    pub origin: NlinkOrigin,

    /// Union nlink minus the real nlink of `origin`.
    pub delta: i32,
}

/// Reads and writes link-count tags.
#[derive(Debug)]
pub struct NlinkLedger {
    limit: RateLimit,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NlinkTag {
    fn new(origin: NlinkOrigin, union_nlink: u32, real_nlink: u32) -> OvlResult<Self> {
        let delta = i32::try_from(union_nlink as i64 - real_nlink as i64)
            .map_err(|_| OvlError::CorruptLedger("nlink delta out of range".to_string()))?;
        Ok(Self { origin, delta })
    }

    /// Applies the tag to the real link count of its origin side.
    pub fn apply(&self, real_nlink: u32) -> Option<u32> {
        let nlink = real_nlink as i64 + self.delta as i64;
        if nlink <= 0 {
            return None;
        }
        u32::try_from(nlink).ok()
    }
}

impl NlinkLedger {
    /// Creates a ledger whose corruption warnings go through `limit`.
    pub fn new(limit: RateLimit) -> Self {
        Self { limit }
    }

    /// Records the inode's union nlink relative to its upper inode.
    ///
    /// Call before an upper link, unlink or rename-over, holding the upper inode's lock.
    pub async fn record_relative_to_upper(
        &self,
        inode: &OverlayInode,
        creds: &Credentials,
    ) -> OvlResult<()> {
        let upper = inode.upper().ok_or_else(|| {
            OvlError::InvalidArgument("no upper inode to record against".to_string())
        })?;
        let real_nlink = upper.getattr(creds).await?.nlink;
        let tag = NlinkTag::new(NlinkOrigin::Upper, inode.nlink(), real_nlink)?;
        self.write(&upper, tag, creds).await
    }

    /// Records the inode's union nlink relative to its lower inode, on the index entry `index`.
    ///
    /// Call before copy-up links the index entry into place.
    pub async fn record_relative_to_lower(
        &self,
        inode: &OverlayInode,
        index: &RealInode,
        creds: &Credentials,
    ) -> OvlResult<()> {
        let lower = inode
            .get_lower()
            .as_ref()
            .ok_or_else(|| OvlError::CorruptLedger("no lower inode to record against".into()))?;
        let real_nlink = lower.getattr(creds).await?.nlink;
        let tag = NlinkTag::new(NlinkOrigin::Lower, inode.nlink(), real_nlink)?;
        self.write(index, tag, creds).await
    }

    /// Computes the union link count from the persisted tag.
    ///
    /// Returns `fallback` when the tag does not apply (a side is missing or the lower inode has no
    /// other links) and when it is missing, malformed or yields a count of zero or less. This never
    /// fails.
    pub async fn read(
        &self,
        lower: Option<&RealInode>,
        upper: Option<&RealInode>,
        fallback: u32,
        creds: &Credentials,
    ) -> u32 {
        let (Some(lower), Some(upper)) = (lower, upper) else {
            return fallback;
        };

        match self.try_read(lower, upper, creds).await {
            Ok(Some(nlink)) => nlink,
            Ok(None) => fallback,
            Err(e) => {
                if self.limit.check() {
                    tracing::warn!(upper = %upper.key(), "failed to get index nlink: {}", e);
                }
                fallback
            }
        }
    }

    async fn try_read(
        &self,
        lower: &RealInode,
        upper: &RealInode,
        creds: &Credentials,
    ) -> OvlResult<Option<u32>> {
        let lower_nlink = lower.getattr(creds).await?.nlink;
        if lower_nlink <= 1 {
            return Ok(None);
        }

        let raw = upper.getxattr(OVERLAY_XATTR_NLINK, creds).await?;
        let text = std::str::from_utf8(&raw)
            .map_err(|_| OvlError::CorruptLedger("tag is not ascii".to_string()))?;
        let tag: NlinkTag = text.parse()?;

        let real_nlink = match tag.origin {
            NlinkOrigin::Lower => lower_nlink,
            NlinkOrigin::Upper => upper.getattr(creds).await?.nlink,
        };

        tag.apply(real_nlink)
            .map(Some)
            .ok_or_else(|| OvlError::CorruptLedger(format!("tag {} gives nlink <= 0", tag)))
    }

    async fn write(&self, target: &RealInode, tag: NlinkTag, creds: &Credentials) -> OvlResult<()> {
        let encoded = tag.to_string();
        if encoded.len() > NLINK_TAG_MAX_LEN {
            return Err(OvlError::CorruptLedger(format!("tag {} too long", encoded)));
        }

        tracing::debug!(inode = %target.key(), tag = %encoded, "recording nlink");
        target
            .setxattr(OVERLAY_XATTR_NLINK, encoded.as_bytes(), XattrFlags::Any, creds)
            .await
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for NlinkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match self.origin {
            NlinkOrigin::Upper => 'U',
            NlinkOrigin::Lower => 'L',
        };
        write!(f, "{}{:+}", origin, self.delta)
    }
}

impl FromStr for NlinkTag {
    type Err = OvlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let corrupt = || OvlError::CorruptLedger(format!("malformed tag {:?}", s));

        if s.len() > NLINK_TAG_MAX_LEN {
            return Err(corrupt());
        }

        let mut chars = s.chars();
        let origin = match chars.next() {
            Some('U') => NlinkOrigin::Upper,
            Some('L') => NlinkOrigin::Lower,
            _ => return Err(corrupt()),
        };

        let signed = chars.as_str();
        let digits = signed
            .strip_prefix('+')
            .or_else(|| signed.strip_prefix('-'))
            .ok_or_else(corrupt)?;

        if digits.is_empty() || digits.len() > 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(corrupt());
        }

        let delta = signed.parse::<i32>().map_err(|_| corrupt())?;
        Ok(Self { origin, delta })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
