//! Shared configuration logic for the virtual device, the host queue, and tests.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [device]
//! firmware_name = "Marlin"
//! response_delay_ms = 20
//! line_ending = "crlf"
//!
//! [device.replies]
//! M115 = ["FIRMWARE_NAME:Marlin bugfix-2.1.x", "ok"]
//!
//! [host]
//! command_timeout_ms = 2000
//! max_retries = 1
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub host: HostConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.open_timeout_ms == 0 {
            return Err(ConfigError::Invalid("host.open_timeout_ms must be > 0".to_string()));
        }
        if self.host.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid("host.command_timeout_ms must be > 0".to_string()));
        }
        if self.device.busy_lines > 64 {
            return Err(ConfigError::Invalid("device.busy_lines must be at most 64".to_string()));
        }
        for (code, lines) in &self.device.replies {
            if lines.last().is_none_or(|line| !line.contains("ok")) {
                // Legal, but a host waiting on this code will never see completion.
                tracing::warn!("Reply override for '{}' does not end with an ok line", code);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Crlf => "\r\n",
        }
    }
}

/// How the simulated device answers, and how fast.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_firmware_name")]
    pub firmware_name: String,
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
    #[serde(default = "default_machine_type")]
    pub machine_type: String,
    #[serde(default)]
    pub open_delay_ms: u64,
    #[serde(default)]
    pub response_delay_ms: u64,
    #[serde(default)]
    pub response_jitter_ms: u64,
    /// Split each reply into chunks of at most this many bytes. 0 sends whole replies.
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub line_ending: LineEnding,
    #[serde(default = "default_busy_lines")]
    pub busy_lines: u32,
    #[serde(default = "default_reported_temp")]
    pub hotend_temp: f64,
    #[serde(default = "default_reported_temp")]
    pub bed_temp: f64,
    /// Canned replies keyed by command code (e.g. "M115"), replacing the built-in ones.
    #[serde(default)]
    pub replies: HashMap<String, Vec<String>>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            firmware_name: default_firmware_name(),
            firmware_version: default_firmware_version(),
            machine_type: default_machine_type(),
            open_delay_ms: 0,
            response_delay_ms: 0,
            response_jitter_ms: 0,
            chunk_size: 0,
            line_ending: LineEnding::default(),
            busy_lines: default_busy_lines(),
            hotend_temp: default_reported_temp(),
            bed_temp: default_reported_temp(),
            replies: HashMap::new(),
        }
    }
}

impl DeviceConfig {
    pub fn open_delay(&self) -> Duration {
        Duration::from_millis(self.open_delay_ms)
    }

    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    /// Frame every command as `N<n> ...*<checksum>`, starting with `M110 N0`.
    #[serde(default)]
    pub line_numbers: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: default_open_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: 0,
            line_numbers: false,
        }
    }
}

impl HostConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_firmware_name() -> String { "Marlin".to_string() }
fn default_firmware_version() -> String { "2.1.2".to_string() }
fn default_machine_type() -> String { "Virtual Marlin".to_string() }
fn default_busy_lines() -> u32 { 1 }
fn default_reported_temp() -> f64 { 21.0 }
fn default_open_timeout_ms() -> u64 { 5000 }
fn default_command_timeout_ms() -> u64 { 30000 }

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
