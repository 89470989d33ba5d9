//! Centralized application directory paths for chime.
//!
//! Provides a single source of truth for the filesystem paths used by the
//! engine. Uses the [`dirs`] crate for platform-appropriate directory
//! resolution.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Task data | `~/Library/Application Support/chime/` | `~/.local/share/chime/` |
//! | Config | `~/Library/Application Support/chime/` | `~/.config/chime/` |
//!
//! # Environment Overrides
//!
//! All paths can be overridden for testing or custom deployments:
//! - `CHIME_DATA_DIR` — overrides [`data_dir`]
//! - `CHIME_CONFIG_DIR` — overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Used for the persisted task store. Resolves to `dirs::data_dir()/chime/`
/// by default. Override with the `CHIME_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CHIME_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("chime"))
        .unwrap_or_else(|| PathBuf::from("/tmp/chime-data"))
}

/// Application config directory.
///
/// Used for `config.toml`. Resolves to `dirs::config_dir()/chime/` by
/// default. Override with the `CHIME_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CHIME_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("chime"))
        .unwrap_or_else(|| PathBuf::from("/tmp/chime-config"))
}

/// Task store file path (`data_dir()/tasks.json`).
#[must_use]
pub fn tasks_file() -> PathBuf {
    data_dir().join("tasks.json")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
