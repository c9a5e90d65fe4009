//! Runtime configuration for the pipeline core.
//!
//! Configuration is consumed only at construction time: device preferences
//! when the [`DeviceManager`](crate::device::DeviceManager) is initialized,
//! streaming defaults when channels are created. Nothing here is re-read
//! while a pipeline is running.
//!
//! # Example
//!
//! ```ignore
//! use mediflow_rs::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::load_from_str(r#"
//!     [device]
//!     prefer_host = true
//!
//!     [streaming]
//!     channel_capacity = 16
//! "#)?;
//! ```

use crate::error::{MediFlowError, Result};
use crate::pipeline::StreamingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default bounded capacity of a lossless streaming channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 50;

/// Default maximum number of frames a dynamic data sequence retains.
pub const DEFAULT_MAX_RETAINED_FRAMES: usize = 1000;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub device: DeviceConfig,
    pub streaming: StreamingConfig,
}

/// Device selection preferences, honored once when devices are enumerated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Prefer the host device for computation even when a compute device
    /// is available.
    pub prefer_host: bool,
    /// Substring match against compute device names; the first matching
    /// device becomes the default computation device.
    pub device_hint: Option<String>,
}

/// Streaming defaults applied when a channel is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Streaming mode used when a consumer does not specify one.
    pub default_mode: StreamingMode,
    /// Queue capacity for lossless streaming before the producer blocks.
    pub channel_capacity: usize,
    /// Upper bound on frames retained by a dynamic data sequence.
    pub max_retained_frames: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            default_mode: StreamingMode::ProcessAllFrames,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_retained_frames: DEFAULT_MAX_RETAINED_FRAMES,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from TOML text.
    pub fn load_from_str(text: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(text)
            .map_err(|e| MediFlowError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::load_from_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.streaming.channel_capacity == 0 {
            return Err(MediFlowError::Config(
                "streaming.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.streaming.max_retained_frames == 0 {
            return Err(MediFlowError::Config(
                "streaming.max_retained_frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(!config.device.prefer_host);
        assert_eq!(config.streaming.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(
            config.streaming.default_mode,
            StreamingMode::ProcessAllFrames
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let config = RuntimeConfig::load_from_str(
            r#"
            [streaming]
            channel_capacity = 8
            default_mode = "NewestFrameOnly"
            "#,
        )
        .unwrap();
        assert_eq!(config.streaming.channel_capacity, 8);
        assert_eq!(config.streaming.default_mode, StreamingMode::NewestFrameOnly);
        // Unspecified sections keep their defaults
        assert!(!config.device.prefer_host);
    }

    #[test]
    fn test_invalid_capacity_rejected() {
        let result = RuntimeConfig::load_from_str(
            r#"
            [streaming]
            channel_capacity = 0
            "#,
        );
        assert!(matches!(result, Err(MediFlowError::Config(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = RuntimeConfig::load_from_str("not [ valid toml");
        assert!(matches!(result, Err(MediFlowError::Config(_))));
    }
}
