//! Configuration management (TOML)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub detection: DetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub sample_interval_seconds: f64,
    pub notifications_enabled: bool,
    /// How long a desktop notification stays visible; 0 means no timeout.
    pub notification_timeout_seconds: u32,
    /// 0 means autodetect from the running system.
    pub core_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub cpu: CpuDetectionConfig,
    pub memory: MemoryDetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuDetectionConfig {
    pub threshold_percent: f64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDetectionConfig {
    pub threshold_bytes: u64,
    pub duration_seconds: f64,
    /// A resident-set shrink up to this many bytes still counts as
    /// "non-decreasing" when tracking sustained growth.
    pub tolerance_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            general: GeneralConfig {
                sample_interval_seconds: 2.0,
                notifications_enabled: true,
                notification_timeout_seconds: 30,
                core_count: 0,
            },
            detection: DetectionConfig {
                cpu: CpuDetectionConfig {
                    threshold_percent: 100.0,
                    duration_seconds: 30.0,
                },
                memory: MemoryDetectionConfig {
                    threshold_bytes: 1_000_000_000,
                    duration_seconds: 5.0,
                    tolerance_bytes: 0,
                },
            },
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> std::path::PathBuf {
        directories::ProjectDirs::from("", "", "procwatch")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| std::path::PathBuf::from("config.toml"))
    }

    /// Configured core count, or the online CPU count when left at 0.
    pub fn effective_core_count(&self) -> u32 {
        if self.general.core_count > 0 {
            return self.general.core_count;
        }
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        n.max(1) as u32
    }
}
