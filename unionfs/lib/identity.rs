use getset::CopyGetters;

use crate::{Layer, OvlError, OvlResult, RateLimit};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A device id and inode number as seen through the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappedIdentity {
    /// Overlay-visible device id.
    pub dev: u64,

    /// Overlay-visible inode number.
    pub ino: u64,
}

/// Maps real device/inode pairs into the overlay's identity space.
#[derive(Debug, CopyGetters)]
pub struct IdentityResolver {
    /// The overlay's own device id.
    #[getset(get_copy = "pub with_prefix")]
    overlay_dev: u64,

    /// Every layer is on one filesystem.
    #[getset(get_copy = "pub with_prefix")]
    same_fs: bool,

    /// High bits of a unified inode number reserved for the layer fsid. Zero disables xino.
    #[getset(get_copy = "pub with_prefix")]
    xino_bits: u32,

    limit: RateLimit,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl IdentityResolver {
    /// Creates a resolver.
    pub fn new(overlay_dev: u64, same_fs: bool, xino_bits: u32, limit: RateLimit) -> Self {
        Self {
            overlay_dev,
            same_fs,
            xino_bits: xino_bits.min(32),
            limit,
        }
    }

    /// True if real inode numbers can be placed in one address space.
    pub fn unifies(&self) -> bool {
        self.same_fs || self.xino_bits > 0
    }

    /// Places `fsid` in the reserved high bits of `ino`.
    ///
    /// Fails if `ino` already uses any of the reserved bits.
    pub fn encode_xino(&self, ino: u64, fsid: u32) -> OvlResult<u64> {
        if self.xino_bits == 0 {
            return Ok(ino);
        }

        let shift = 64 - self.xino_bits;
        if ino >> shift != 0 {
            return Err(OvlError::InodeNumberOverflow {
                ino,
                xino_bits: self.xino_bits,
            });
        }

        Ok(ino | ((fsid as u64) << shift))
    }

    /// Maps a real identity to the overlay-visible one.
    ///
    /// `lower_layer` is the lower layer the inode number was taken from, or `None` when it came
    /// from the upper layer. `local_ino` is the overlay inode's own number, used for directories
    /// when numbers cannot be unified.
    pub fn map_identity(
        &self,
        real_dev: u64,
        real_ino: u64,
        is_dir: bool,
        lower_layer: Option<&Layer>,
        local_ino: u64,
    ) -> MappedIdentity {
        if self.same_fs {
            return MappedIdentity {
                dev: self.overlay_dev,
                ino: real_ino,
            };
        }

        if self.xino_bits > 0 {
            let fsid = lower_layer.map(|layer| layer.get_fsid()).unwrap_or(0);
            match self.encode_xino(real_ino, fsid) {
                Ok(ino) => {
                    return MappedIdentity {
                        dev: self.overlay_dev,
                        ino,
                    }
                }
                Err(e) => {
                    if self.limit.check() {
                        tracing::warn!(real_dev, "{}", e);
                    }
                }
            }
        }

        if is_dir {
            return MappedIdentity {
                dev: self.overlay_dev,
                ino: local_ino,
            };
        }

        match lower_layer {
            Some(layer) if layer.get_fsid() > 0 => MappedIdentity {
                dev: layer.get_pseudo_dev(),
                ino: real_ino,
            },
            _ => MappedIdentity {
                dev: real_dev,
                ino: real_ino,
            },
        }
    }

    /// The rate limiter guarding overflow warnings.
    pub fn get_limit(&self) -> &RateLimit {
        &self.limit
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
