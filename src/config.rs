//! Configuration types for the task expiry engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the expiry engine.
///
/// Scalar fields precede the nested tables so the whole struct serializes
/// to TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between expiry checks in ms.
    pub poll_interval_ms: u64,
    /// Task store settings.
    pub store: StoreConfig,
    /// Snooze arithmetic settings.
    pub snooze: SnoozePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            store: StoreConfig::default(),
            snooze: SnoozePolicy::default(),
        }
    }
}

/// Task store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Task store file path (None = `paths::tasks_file()`).
    pub path: Option<PathBuf>,
    /// Delay after each store write in ms.
    ///
    /// Best-effort measure against read-after-write races when a second
    /// process polls the store file. Not a consistency mechanism; leave at
    /// 0 unless an external reader needs it.
    pub settle_delay_ms: u64,
    /// Days of task history to retain; older date groups are pruned.
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            settle_delay_ms: 0,
            retention_days: 30,
        }
    }
}

impl StoreConfig {
    /// Returns the configured store path, or the platform default.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(crate::paths::tasks_file)
    }
}

/// Snooze arithmetic constants.
///
/// A snooze adds `time_since_expiry + tier seconds + overlap_time` to a
/// task's accumulated `snooze_time` (see the engine for the full rules).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozePolicy {
    /// Seconds added by a short snooze.
    pub short_secs: i64,
    /// Seconds added by a long snooze.
    pub long_secs: i64,
    /// Step in seconds used to walk a snoozed task off a colliding
    /// trigger time.
    pub collision_step_secs: i64,
    /// Boundary in seconds that time-since-expiry is floored to before it
    /// is added to the snooze.
    pub expiry_floor_secs: i64,
}

impl Default for SnoozePolicy {
    fn default() -> Self {
        Self {
            short_secs: 30,
            long_secs: 36_000,
            collision_step_secs: 10,
            expiry_floor_secs: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ChimeError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ChimeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`config_dir()/config.toml`).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_file()
    }
}
