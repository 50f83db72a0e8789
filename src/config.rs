//! Slab configuration
//!
//! Settings can come from three places:
//! - `SlabConfig::default()`
//! - `PHOTONSLAB_*` environment variables (`SlabConfig::from_env`)
//! - a TOML file (`SlabConfig::from_toml_file`)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for a slab and the façade built on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlabConfig {
    /// Worker threads in the traversal pool owned by each slab
    pub traversal_threads: usize,
    /// Partitions used when a caller does not pick a parallelism
    pub default_parallelism: usize,
    /// Slots added to the media per growth step
    pub segment_slots: u64,
    /// Fsync the log and the slot file on every commit
    pub sync_writes: bool,
}

impl Default for SlabConfig {
    fn default() -> Self {
        Self {
            traversal_threads: 4,
            default_parallelism: 4,
            segment_slots: 1024,
            sync_writes: true,
        }
    }
}

impl SlabConfig {
    /// Build a config from `PHOTONSLAB_*` variables.
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let traversal_threads = std::env::var("PHOTONSLAB_TRAVERSAL_THREADS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.traversal_threads);

        let default_parallelism = std::env::var("PHOTONSLAB_PARALLELISM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_parallelism);

        let segment_slots = std::env::var("PHOTONSLAB_SEGMENT_SLOTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.segment_slots);

        let sync_writes = std::env::var("PHOTONSLAB_SYNC_WRITES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.sync_writes);

        Self {
            traversal_threads,
            default_parallelism,
            segment_slots,
            sync_writes,
        }
    }

    /// Load a config from a TOML file. Fields left out of the file keep their defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the slab cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.traversal_threads == 0 {
            return Err(Error::Config("traversal_threads must be at least 1".to_string()));
        }
        if self.default_parallelism == 0 {
            return Err(Error::Config(
                "default_parallelism must be at least 1".to_string(),
            ));
        }
        if self.segment_slots == 0 {
            return Err(Error::Config("segment_slots must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() -> Result<()> {
        let config = SlabConfig::default();
        config.validate()?;
        assert_eq!(config.segment_slots, 1024);
        assert!(config.sync_writes);
        Ok(())
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = SlabConfig::from_toml_str("traversal_threads = 8\nsync_writes = false\n")?;
        assert_eq!(config.traversal_threads, 8);
        assert!(!config.sync_writes);
        assert_eq!(config.default_parallelism, 4);
        assert_eq!(config.segment_slots, 1024);
        Ok(())
    }

    #[test]
    fn test_zero_segment_rejected() {
        let result = SlabConfig::from_toml_str("segment_slots = 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_toml_file_round_trip() -> Result<()> {
        let path = std::env::temp_dir().join(format!("photonslab_config_{}.toml", std::process::id()));
        let config = SlabConfig {
            traversal_threads: 2,
            default_parallelism: 3,
            segment_slots: 64,
            sync_writes: false,
        };
        let text = toml::to_string(&config)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        std::fs::write(&path, text).map_err(|e| Error::Storage(e.to_string()))?;

        let loaded = SlabConfig::from_toml_file(&path)?;
        assert_eq!(loaded, config);

        std::fs::remove_file(path).ok();
        Ok(())
    }
}
