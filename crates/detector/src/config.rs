//! Detector configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub detector: DetectorSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    /// Host paths used to resolve device nodes and mount points
    #[serde(default)]
    pub linux: LinuxSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSettings {
    pub log_level: String,
    /// How long the monitor thread waits for USB activity per iteration
    #[serde(default = "DetectorSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Events buffered per subscriber before it starts lagging
    #[serde(default = "DetectorSettings::default_event_capacity")]
    pub event_capacity: usize,
}

impl DetectorSettings {
    fn default_poll_interval() -> u64 {
        250
    }

    fn default_event_capacity() -> usize {
        64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns of devices to report (empty = all)
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default = "UsbSettings::default_skip_root_hubs")]
    pub skip_root_hubs: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            skip_root_hubs: Self::default_skip_root_hubs(),
        }
    }
}

impl UsbSettings {
    fn default_skip_root_hubs() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinuxSettings {
    #[serde(default = "LinuxSettings::default_sysfs_root")]
    pub sysfs_root: PathBuf,
    #[serde(default = "LinuxSettings::default_dev_root")]
    pub dev_root: PathBuf,
    #[serde(default = "LinuxSettings::default_mounts_path")]
    pub mounts_path: PathBuf,
    /// Delay before looking up the block node of a newly attached mass storage device
    #[serde(default = "LinuxSettings::default_mount_settle")]
    pub mount_settle_ms: u64,
    #[serde(default = "LinuxSettings::default_resolve_mounts")]
    pub resolve_mounts: bool,
}

impl Default for LinuxSettings {
    fn default() -> Self {
        Self {
            sysfs_root: Self::default_sysfs_root(),
            dev_root: Self::default_dev_root(),
            mounts_path: Self::default_mounts_path(),
            mount_settle_ms: Self::default_mount_settle(),
            resolve_mounts: Self::default_resolve_mounts(),
        }
    }
}

impl LinuxSettings {
    fn default_sysfs_root() -> PathBuf {
        PathBuf::from("/sys")
    }

    fn default_dev_root() -> PathBuf {
        PathBuf::from("/dev")
    }

    fn default_mounts_path() -> PathBuf {
        PathBuf::from("/proc/mounts")
    }

    fn default_mount_settle() -> u64 {
        1000 // block devices show up well after the USB device
    }

    fn default_resolve_mounts() -> bool {
        true
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detector: DetectorSettings {
                log_level: "info".to_string(),
                poll_interval_ms: DetectorSettings::default_poll_interval(),
                event_capacity: DetectorSettings::default_event_capacity(),
            },
            usb: UsbSettings::default(),
            linux: LinuxSettings::default(),
        }
    }
}

impl DetectorConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-detection/detector.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: DetectorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.expand_paths();
        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Logging is not initialized before the config is known
                eprintln!("Config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-detection").join("detector.toml")
        } else {
            PathBuf::from(".config/usb-detection/detector.toml")
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.detector.poll_interval_ms)
    }

    pub fn mount_settle(&self) -> Duration {
        Duration::from_millis(self.linux.mount_settle_ms)
    }

    fn expand_paths(&mut self) {
        for path in [
            &mut self.linux.sysfs_root,
            &mut self.linux.dev_root,
            &mut self.linux.mounts_path,
        ] {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            *path = PathBuf::from(expanded);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.detector.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.detector.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.detector.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }

        if self.detector.event_capacity == 0 {
            return Err(anyhow!("event_capacity must be greater than 0"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    pub(crate) fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        if !id.starts_with("0x") && !id.starts_with("0X") {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                name,
                id
            ));
        }

        let hex_part = &id[2..];
        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}
