use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Environment variable that overrides the settings file location.
pub const CONFIG_ENV: &str = "GLOVE_BRIDGE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
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
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
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
    "glove_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// One statically known glove slot and the pipes the host application exposes for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Advertised BLE name, also the registry key.
    pub role: String,
    /// Pipe the telemetry lines are written to.
    pub inbound_pipe: String,
    /// Pipe the command lines are read from.
    pub outbound_pipe: String,
}

impl DeviceSettings {
    pub fn new(role: &str, inbound_pipe: &str, outbound_pipe: &str) -> Self {
        Self {
            role: role.to_string(),
            inbound_pipe: inbound_pipe.to_string(),
            outbound_pipe: outbound_pipe.to_string(),
        }
    }
}

fn default_devices() -> Vec<DeviceSettings> {
    vec![
        DeviceSettings::new(
            "lucidgloves-right",
            r"\\.\pipe\vrapplication\input\glove\v1\right",
            r"\\.\pipe\vrapplication\ffb\curl\right",
        ),
        DeviceSettings::new(
            "lucidgloves-left",
            r"\\.\pipe\vrapplication\input\glove\v1\left",
            r"\\.\pipe\vrapplication\ffb\curl\left",
        ),
    ]
}

/// Intervals and timeouts, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_5s")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_5s")]
    pub scan_window_ms: u64,
    #[serde(default = "default_5s")]
    pub address_poll_ms: u64,
    #[serde(default = "default_5s")]
    pub backoff_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_pacing")]
    pub pacing_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_5s")]
    pub io_timeout_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_5s(),
            scan_window_ms: default_5s(),
            address_poll_ms: default_5s(),
            backoff_ms: default_5s(),
            backoff_max_ms: default_backoff_max(),
            pacing_ms: default_pacing(),
            connect_timeout_ms: default_connect_timeout(),
            io_timeout_ms: default_5s(),
        }
    }
}

impl TimingSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }
    pub fn address_poll(&self) -> Duration {
        Duration::from_millis(self.address_poll_ms)
    }
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Backoff after `failures` consecutive failures (1-based), doubling up to the cap.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let ms = self
            .backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms.max(self.backoff_ms));
        Duration::from_millis(ms)
    }
}

fn default_5s() -> u64 {
    5000
}
fn default_backoff_max() -> u64 {
    60_000
}
fn default_pacing() -> u64 {
    1000
}
fn default_connect_timeout() -> u64 {
    10_000
}

fn default_telemetry_uuid() -> Uuid {
    Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E)
}
fn default_command_uuid() -> Uuid {
    Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("no devices configured")]
    NoDevices,
    #[error("device role must not be empty")]
    EmptyRole,
    #[error("duplicate device role: {0}")]
    DuplicateRole(String),
    #[error("device {0} has an empty pipe path")]
    EmptyPipe(String),
    #[error("timing value {0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceSettings>,

    // GATT characteristics (Nordic UART layout)
    #[serde(default = "default_telemetry_uuid")]
    pub telemetry_char_uuid: Uuid,
    #[serde(default = "default_command_uuid")]
    pub command_char_uuid: Uuid,

    #[serde(default)]
    pub timing: TimingSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            telemetry_char_uuid: default_telemetry_uuid(),
            command_char_uuid: default_command_uuid(),
            timing: TimingSettings::default(),
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.devices.is_empty() {
            return Err(SettingsError::NoDevices);
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.role.trim().is_empty() {
                return Err(SettingsError::EmptyRole);
            }
            if !seen.insert(device.role.as_str()) {
                return Err(SettingsError::DuplicateRole(device.role.clone()));
            }
            if device.inbound_pipe.is_empty() || device.outbound_pipe.is_empty() {
                return Err(SettingsError::EmptyPipe(device.role.clone()));
            }
        }

        let t = &self.timing;
        for (name, value) in [
            ("scan_interval_ms", t.scan_interval_ms),
            ("scan_window_ms", t.scan_window_ms),
            ("address_poll_ms", t.address_poll_ms),
            ("backoff_ms", t.backoff_ms),
            ("pacing_ms", t.pacing_ms),
            ("connect_timeout_ms", t.connect_timeout_ms),
            ("io_timeout_ms", t.io_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::ZeroDuration(name));
            }
        }

        Ok(())
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
    wrote_defaults: bool,
    load_warnings: Vec<String>,
}

impl SettingsService {
    /// Load settings from `path`, or from the default location when `None`.
    ///
    /// A missing file is replaced by the defaults, which are written back so they
    /// can be edited. An unreadable file falls back to the defaults.
    ///
    /// This runs before logging is configured, so problems are kept in
    /// [`load_warnings`](Self::load_warnings) for the caller to report.
    pub fn new(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = match path {
            Some(p) => p,
            None => Self::get_settings_path()?,
        };

        let mut service = Self {
            settings: Settings::default(),
            settings_path,
            wrote_defaults: false,
            load_warnings: Vec::new(),
        };

        if service.settings_path.exists() {
            match Self::load_from_file(&service.settings_path) {
                Ok(s) => service.settings = s,
                Err(e) => service.load_warnings.push(format!(
                    "Ignoring unreadable settings {}: {:#}",
                    service.settings_path.display(),
                    e
                )),
            }
        } else {
            match service.save() {
                Ok(()) => service.wrote_defaults = true,
                Err(e) => service
                    .load_warnings
                    .push(format!("Could not write default settings: {:#}", e)),
            }
        }

        service.settings.validate().context("invalid settings")?;
        Ok(service)
    }

    /// Problems met while loading, oldest first.
    pub fn load_warnings(&self) -> &[String] {
        &self.load_warnings
    }

    /// Whether the file was missing and the defaults were written in its place.
    pub fn wrote_defaults(&self) -> bool {
        self.wrote_defaults
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("GloveBridge");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
