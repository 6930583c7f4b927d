//! Device configuration.
//!
//! Defaults match the constants the logger was tuned with. The whole
//! structure can be persisted or shipped as a compact postcard blob.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub store: StoreConfig,
    pub sensor: SensorConfig,
    pub pipeline: PipelineConfig,
}

/// EEPROM write-cycle polling
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Status polls before a write is reported as timed out
    pub max_write_polls: u32,
    /// Pause between two status polls, in microseconds
    pub poll_interval_us: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        // 25LC256 write cycle is 5 ms max; allow ten times that.
        Self {
            max_write_polls: 500,
            poll_interval_us: 100,
        }
    }
}

/// LIS3DH over-threshold detection
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorConfig {
    /// INT1_THS value. 1 LSB = 16 mg at +-2 g full scale.
    pub threshold: u8,
    /// INT1_DURATION value. 1 LSB = 5 ms at 200 Hz ODR.
    pub duration: u8,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            threshold: 0x64, // 1.6 g
            duration: 0x14,  // 100 ms
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Back-to-back INT1_SRC reads, one SPI transaction each, spent draining
    /// a repeating threshold signal. Not a time bound.
    pub max_drain_polls: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_drain_polls: 1000,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config codec failed: {0}")]
    Codec(postcard::Error),
}

impl Config {
    /// Encode as a postcard blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(ConfigError::Codec)
    }

    /// Decode a blob produced by [`Config::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(ConfigError::Codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_tuning() {
        let config = Config::default();
        assert_eq!(config.sensor.threshold, 0x64);
        assert_eq!(config.sensor.duration, 0x14);
        assert!(config.store.max_write_polls > 0);
    }

    #[test]
    fn blob_survives_encoding() {
        let config = Config {
            sensor: SensorConfig {
                threshold: 0x30,
                duration: 0x02,
            },
            ..Config::default()
        };

        let bytes = config.to_bytes().unwrap();
        assert_eq!(Config::from_bytes(&bytes).unwrap(), config);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let bytes = Config::default().to_bytes().unwrap();
        assert!(matches!(
            Config::from_bytes(&bytes[..bytes.len() - 1]),
            Err(ConfigError::Codec(_))
        ));
    }
}
