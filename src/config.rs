use crate::error::MetaBindError;
use serde::{Deserialize, Serialize};
use std::{fs::read_to_string, path::Path, time::Duration};

pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 200;
pub const MIN_SYNC_INTERVAL_MS: u64 = 50;
pub const MAX_SYNC_INTERVAL_MS: u64 = 1000;
/// Idle cycles a cache item without subscribers survives before eviction.
pub const DEFAULT_IDLE_CYCLE_THRESHOLD: u32 = 5 * 60;
/// Cycles after a local write during which external updates are deferred.
pub const DEFAULT_EXTERNAL_WRITE_LOCK_CYCLES: u32 = 5;

/// Host-supplied tuning for a [crate::manager::MetadataManager].
///
/// The write-lock window is counted in cycles and is independent of the sync interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub sync_interval_ms: u64,
    pub min_sync_interval_ms: u64,
    pub max_sync_interval_ms: u64,
    pub idle_cycle_threshold: u32,
    pub external_write_lock_cycles: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            min_sync_interval_ms: MIN_SYNC_INTERVAL_MS,
            max_sync_interval_ms: MAX_SYNC_INTERVAL_MS,
            idle_cycle_threshold: DEFAULT_IDLE_CYCLE_THRESHOLD,
            external_write_lock_cycles: DEFAULT_EXTERNAL_WRITE_LOCK_CYCLES,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, MetaBindError> {
        let config: ManagerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MetaBindError> {
        tracing::debug!("Attempting to read manager config from: {:?}", path.as_ref());
        if !path.as_ref().exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(ManagerConfig::default());
        }
        let content = read_to_string(path)?;
        ManagerConfig::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), MetaBindError> {
        if self.min_sync_interval_ms == 0 {
            return Err(MetaBindError::Config(
                "min_sync_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.min_sync_interval_ms > self.max_sync_interval_ms {
            return Err(MetaBindError::Config(format!(
                "min_sync_interval_ms ({}) exceeds max_sync_interval_ms ({})",
                self.min_sync_interval_ms, self.max_sync_interval_ms
            )));
        }
        if self.external_write_lock_cycles == 0 {
            return Err(MetaBindError::Config(
                "external_write_lock_cycles must be at least one cycle".to_string(),
            ));
        }
        Ok(())
    }

    /// The tick period a host should use, clamped into the min/max bounds.
    pub fn effective_sync_interval(&self) -> Duration {
        let ms = self
            .sync_interval_ms
            .max(self.min_sync_interval_ms)
            .min(self.max_sync_interval_ms.max(self.min_sync_interval_ms));
        Duration::from_millis(ms)
    }
}
