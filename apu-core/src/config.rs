//! Daemon configuration
//!
//! Loaded once at startup from JSON. Every field has a default, so a missing
//! file is not an error; a malformed one is.

use crate::constants::{paths, profile, watcher};
use crate::profile::validation::is_valid_name;
use apu_error::{ApuError, Result};
use apu_protocol::HardwareLimits;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub profiles_dir: PathBuf,
    pub default_profile: String,
    pub poll_interval_ms: u64,
    pub debounce_threshold: u32,
    pub watcher_enabled: bool,
    pub power_profile_tool: String,
    pub ryzenadj_library: String,
    pub hardware_limits: HardwareLimits,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(paths::SOCKET_PATH),
            profiles_dir: PathBuf::from(paths::PROFILES_DIR),
            default_profile: profile::DEFAULT_PROFILE.to_string(),
            poll_interval_ms: watcher::DEFAULT_POLL_INTERVAL_MS,
            debounce_threshold: watcher::DEFAULT_DEBOUNCE_THRESHOLD,
            watcher_enabled: true,
            power_profile_tool: apu_hw::hw_const::POWER_PROFILE_TOOL.to_string(),
            ryzenadj_library: apu_hw::hw_const::RYZENADJ_LIBRARY.to_string(),
            hardware_limits: HardwareLimits::default(),
        }
    }
}

impl DaemonConfig {
    /// Config file location: explicit path, then `APUCTL_CONFIG`, then the
    /// system file if present, then the per-user config dir.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(paths::CONFIG_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        let system = PathBuf::from(paths::SYSTEM_CONFIG_FILE);
        if system.exists() {
            return system;
        }
        dirs::config_dir()
            .map(|dir| dir.join(paths::APP_DIR_NAME).join(paths::CONFIG_FILE_NAME))
            .unwrap_or(system)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ApuError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ApuError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if !is_valid_name(&self.default_profile) {
            errors.push(format!("defaultProfile {:?} is not a valid profile name", self.default_profile));
        }
        if self.debounce_threshold == 0 {
            errors.push("debounceThreshold must be at least 1".to_string());
        }
        if self.power_profile_tool.trim().is_empty() {
            errors.push("powerProfileTool must not be empty".to_string());
        }
        for name in self.hardware_limits.inverted_ranges() {
            errors.push(format!("hardwareLimits.{}.min must not exceed max", name));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ApuError::config(errors.join("; ")))
        }
    }

    /// Watcher tick, raised to the minimum with a warning
    pub fn poll_interval(&self) -> Duration {
        clamp_poll_interval(self.poll_interval_ms)
    }
}

pub fn clamp_poll_interval(ms: u64) -> Duration {
    if ms < watcher::MIN_POLL_INTERVAL_MS {
        warn!(
            "Poll interval {}ms is below the minimum, using {}ms",
            ms,
            watcher::MIN_POLL_INTERVAL_MS
        );
        Duration::from_millis(watcher::MIN_POLL_INTERVAL_MS)
    } else {
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.default_profile, "balanced");
        assert_eq!(config.debounce_threshold, 2);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"pollIntervalMs": 1000, "defaultProfile": "quiet"}"#).unwrap();
        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.default_profile, "quiet");
        assert!(config.watcher_enabled);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(DaemonConfig::load(&path), Err(ApuError::Config(_))));

        fs::write(&path, r#"{"debounceThreshold": 0}"#).unwrap();
        assert!(matches!(DaemonConfig::load(&path), Err(ApuError::Config(_))));
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let config = DaemonConfig { poll_interval_ms: 100, ..Default::default() };
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    #[serial]
    fn test_resolve_path_precedence() {
        let explicit = PathBuf::from("/tmp/explicit.json");
        std::env::set_var(paths::CONFIG_ENV, "/tmp/from-env.json");
        assert_eq!(DaemonConfig::resolve_path(Some(&explicit)), explicit);
        assert_eq!(DaemonConfig::resolve_path(None), PathBuf::from("/tmp/from-env.json"));
        std::env::remove_var(paths::CONFIG_ENV);
    }
}
