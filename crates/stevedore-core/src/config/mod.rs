//! Kernel configuration loaded from `stevedore.toml`.

mod paths;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use paths::{default_config_path, default_work_dir};

/// Top-level kernel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Root for per-artifact staging areas.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl KernelConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load the file if present, defaults otherwise.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

/// Settings for the background stall monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps of the in-flight operation registry.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Age in seconds past which an in-flight operation is reported stalled.
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_period_secs() -> u64 {
    30
}
fn default_stall_threshold_secs() -> u64 {
    300
} // 5 min

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            period_secs: default_period_secs(),
            stall_threshold_secs: default_stall_threshold_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let config = KernelConfig::load_or_default(&tmp.path().join("stevedore.toml")).unwrap();
        assert!(config.monitor.enabled);
        assert_eq!(config.monitor.period_secs, 30);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let path = tmp.path().join("stevedore.toml");
        std::fs::write(&path, "[monitor]\nperiod_secs = 5\n").unwrap();

        let config = KernelConfig::load_or_default(&path).unwrap();
        assert_eq!(config.monitor.period_secs, 5);
        assert_eq!(config.monitor.stall_threshold_secs, 300);
        assert!(config.monitor.enabled);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut config = KernelConfig::default();
        config.monitor.stall_threshold_secs = 60;

        let serialized = toml::to_string(&config).unwrap();
        let parsed: KernelConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.monitor.stall_threshold_secs, 60);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let path = tmp.path().join("stevedore.toml");
        std::fs::write(&path, "monitor = 12").unwrap();
        assert!(KernelConfig::load_or_default(&path).is_err());
    }
}
