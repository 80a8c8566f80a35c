use crate::domain::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_remote_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub known_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE identifiers
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_control_uuid")]
    pub ble_control_char_uuid: String,
    #[serde(default = "default_false")]
    pub debug_show_all_devices: bool,

    // Session timing
    #[serde(default = "default_repeat_interval_ms")]
    pub repeat_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_write_failures")]
    pub max_write_failures: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            known_addresses: Vec::new(),
            last_connected_address: None,
            log_settings: LogSettings::default(),
            ble_service_uuid: default_service_uuid(),
            ble_control_char_uuid: default_control_uuid(),
            debug_show_all_devices: false,
            repeat_interval_ms: default_repeat_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_write_failures: default_max_write_failures(),
        }
    }
}

fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_control_uuid() -> String {
    protocol::CONTROL_CHAR_UUID.to_string()
}
fn default_repeat_interval_ms() -> u64 {
    100
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_max_write_failures() -> u32 {
    3
}

/// Session tuning derived from [`Settings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub service_uuid: Uuid,
    pub control_char_uuid: Uuid,
    pub repeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_write_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::service_uuid(),
            control_char_uuid: protocol::control_char_uuid(),
            repeat_interval: Duration::from_millis(default_repeat_interval_ms()),
            reconnect_delay: Duration::from_millis(default_reconnect_delay_ms()),
            max_write_failures: default_max_write_failures(),
        }
    }
}

impl Settings {
    /// Build the session configuration, rejecting malformed UUID overrides
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        Ok(SessionConfig {
            service_uuid: Uuid::parse_str(&self.ble_service_uuid)?,
            control_char_uuid: Uuid::parse_str(&self.ble_control_char_uuid)?,
            repeat_interval: Duration::from_millis(self.repeat_interval_ms.max(1)),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_write_failures: self.max_write_failures.max(1),
        })
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleRemoteController");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Remember an address that reached the ready state
    pub fn remember_address(&mut self, address: &str) -> anyhow::Result<()> {
        if !self.settings.known_addresses.iter().any(|a| a == address) {
            self.settings.known_addresses.push(address.to_string());
        }
        self.settings.last_connected_address = Some(address.to_string());
        self.save()
    }
}
