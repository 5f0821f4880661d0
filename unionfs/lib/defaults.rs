use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Prefix of the extended attributes the overlay keeps for itself on real inodes.
pub const OVERLAY_XATTR_PREFIX: &str = "trusted.overlay.";

/// Prefix of the trusted extended attribute namespace.
pub const TRUSTED_XATTR_PREFIX: &str = "trusted.";

/// Name of the persisted link-count tag.
pub const OVERLAY_XATTR_NLINK: &str = "trusted.overlay.nlink";

/// Name of the origin file handle recorded on upper inodes that were copied up.
pub const OVERLAY_XATTR_ORIGIN: &str = "trusted.overlay.origin";

/// Marks an upper directory that may contain entries with origin references.
pub const OVERLAY_XATTR_IMPURE: &str = "trusted.overlay.impure";

/// Maximum length of a persisted link-count tag.
pub const NLINK_TAG_MAX_LEN: usize = 12;

/// Device id reported for the overlay itself when none is configured.
pub const DEFAULT_OVERLAY_DEV: u64 = 0x0000_4f56;

/// First pseudo device id handed out to lower layers on other filesystems.
pub const DEFAULT_PSEUDO_DEV_BASE: u64 = 0x0010_0000;

/// Default window for rate-limited warnings.
pub const DEFAULT_RATELIMIT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of warnings allowed per window.
pub const DEFAULT_RATELIMIT_BURST: u32 = 10;
