use std::{path::Path, time::Duration};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    defaults::{
        DEFAULT_OVERLAY_DEV, DEFAULT_PSEUDO_DEV_BASE, DEFAULT_RATELIMIT_BURST,
        DEFAULT_RATELIMIT_INTERVAL,
    },
    OvlError, OvlResult, RateLimit,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Overlay settings.
///
/// ```toml
/// overlay_dev = 79
/// xino = "auto"
/// index = true
/// verify_lower = false
///
/// [ratelimit]
/// interval_ms = 5000
/// burst = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters, CopyGetters)]
pub struct OverlayConfig {
    /// The overlay's own device id.
    #[serde(default = "OverlayConfig::default_overlay_dev")]
    #[builder(default = OverlayConfig::default_overlay_dev())]
    #[getset(get_copy = "pub with_prefix")]
    overlay_dev: u64,

    /// High bits reserved for layer ids in unified inode numbers.
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    xino: XinoMode,

    /// An index area is configured on the upper layer.
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    index: bool,

    /// Lower hardlinks and redirects are verified against the index.
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    verify_lower: bool,

    /// Stable file handles are exported.
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    export_handles: bool,

    /// First pseudo device id for lower layers on other filesystems.
    #[serde(default = "OverlayConfig::default_pseudo_dev_base")]
    #[builder(default = OverlayConfig::default_pseudo_dev_base())]
    #[getset(get_copy = "pub with_prefix")]
    pseudo_dev_base: u64,

    /// Limits for repeated warnings.
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    ratelimit: RateLimitConfig,
}

/// How many high inode-number bits hold the layer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XinoMode {
    /// No bits reserved.
    #[default]
    Off,

    /// Just enough bits for the layers in use.
    Auto,

    /// A fixed number of bits.
    Bits(u32),
}

/// Burst/interval settings for rate-limited warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, CopyGetters)]
#[serde(default)]
#[getset(get_copy = "pub with_prefix")]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    #[builder(default = DEFAULT_RATELIMIT_INTERVAL.as_millis() as u64)]
    interval_ms: u64,

    /// Messages allowed per window.
    #[builder(default = DEFAULT_RATELIMIT_BURST)]
    burst: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlayConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(s: &str) -> OvlResult<Self> {
        toml::from_str(s).map_err(|e| OvlError::InvalidConfig(e.to_string()))
    }

    /// Reads and parses a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> OvlResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&text)
    }

    /// Serializes to TOML.
    pub fn to_toml_string(&self) -> OvlResult<String> {
        toml::to_string(self).map_err(|e| OvlError::InvalidConfig(e.to_string()))
    }

    fn default_overlay_dev() -> u64 {
        DEFAULT_OVERLAY_DEV
    }

    fn default_pseudo_dev_base() -> u64 {
        DEFAULT_PSEUDO_DEV_BASE
    }
}

impl XinoMode {
    /// Resolves the number of reserved bits for a layer stack.
    ///
    /// Returns 0 when all layers share one filesystem. Explicit bits must be in 1..=32 and wide
    /// enough to hold `max_fsid`.
    pub fn resolve(&self, same_fs: bool, max_fsid: u32) -> OvlResult<u32> {
        let needed = u32::BITS - max_fsid.leading_zeros();

        match *self {
            XinoMode::Off => Ok(0),
            XinoMode::Auto if same_fs => Ok(0),
            XinoMode::Auto => Ok(needed),
            XinoMode::Bits(bits) => {
                if !(1..=32).contains(&bits) {
                    return Err(OvlError::InvalidConfig(format!(
                        "xino bits must be in 1..=32, got {}",
                        bits
                    )));
                }
                if bits < needed {
                    return Err(OvlError::InvalidConfig(format!(
                        "{} xino bits cannot hold fsid {}",
                        bits, max_fsid
                    )));
                }
                Ok(if same_fs { 0 } else { bits })
            }
        }
    }
}

impl RateLimitConfig {
    /// Builds a limiter from these settings.
    pub fn limiter(&self, name: &'static str) -> RateLimit {
        RateLimit::new(name, Duration::from_millis(self.interval_ms), self.burst)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for OverlayConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let config = OverlayConfig::from_toml_str(
            r#"
            overlay_dev = 79
            xino = { bits = 4 }
            index = true

            [ratelimit]
            interval_ms = 1000
            burst = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.get_overlay_dev(), 79);
        assert_eq!(config.get_xino(), XinoMode::Bits(4));
        assert!(config.get_index());
        assert!(!config.get_verify_lower());
        assert_eq!(config.get_pseudo_dev_base(), DEFAULT_PSEUDO_DEV_BASE);
        assert_eq!(config.get_ratelimit().get_burst(), 3);
    }

    #[test]
    fn test_config_defaults_and_roundtrip() {
        let config = OverlayConfig::from_toml_str(r#"xino = "auto""#).unwrap();
        assert_eq!(config.get_xino(), XinoMode::Auto);
        assert_eq!(config.get_overlay_dev(), DEFAULT_OVERLAY_DEV);
        assert_eq!(config.get_ratelimit(), &RateLimitConfig::default());

        let text = config.to_toml_string().unwrap();
        assert_eq!(OverlayConfig::from_toml_str(&text).unwrap(), config);
    }

    #[tokio::test]
    async fn test_config_load() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("overlay.toml");
        tokio::fs::write(&path, "index = true\nexport_handles = true\n").await?;

        let config = OverlayConfig::load(&path).await?;
        assert!(config.get_index());
        assert!(config.get_export_handles());

        assert!(matches!(
            OverlayConfig::load(temp_dir.path().join("missing.toml")).await,
            Err(OvlError::Io(_))
        ));

        Ok(())
    }

    #[test]
    fn test_config_rejects_garbage() {
        assert!(matches!(
            OverlayConfig::from_toml_str("xino = 7"),
            Err(OvlError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_xino_resolve() {
        assert_eq!(XinoMode::Off.resolve(false, 3).unwrap(), 0);
        assert_eq!(XinoMode::Auto.resolve(true, 0).unwrap(), 0);
        assert_eq!(XinoMode::Auto.resolve(false, 1).unwrap(), 1);
        assert_eq!(XinoMode::Auto.resolve(false, 3).unwrap(), 2);
        assert_eq!(XinoMode::Auto.resolve(false, 4).unwrap(), 3);
        assert_eq!(XinoMode::Bits(8).resolve(false, 3).unwrap(), 8);
        assert!(XinoMode::Bits(1).resolve(false, 2).is_err());
        assert!(XinoMode::Bits(0).resolve(false, 0).is_err());
        assert!(XinoMode::Bits(33).resolve(false, 0).is_err());
    }
}
