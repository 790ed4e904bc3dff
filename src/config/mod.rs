//! # Configuration Management Module
//!
//! Loads the bridge configuration once at startup. Nothing here is reloaded at
//! runtime; a changed file takes effect on the next restart.
//!
//! ## Configuration Structure
//!
//! - [`TriggerConfig`] - listener for `SEND:<port>` trigger requests
//! - [`PortProfile`] - one entry per logical scale port (line settings, timeout, scaling)
//! - [`BroadcastConfig`] - subscriber listener and outbound subscriber targets
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [trigger]
//! bind = "0.0.0.0"
//! port = 5000
//! request_timeout_ms = 5000  # idle connections are closed after this
//!
//! [[serial_ports]]
//! name = "COM3"
//! device = "/dev/ttyUSB0"   # optional; defaults to `name`
//! baud_rate = 9600
//! data_bits = 8
//! parity = "none"
//! stop_bits = "one"
//! handshake = "none"
//! timeout_ms = 20000
//! decimal_places = 2
//!
//! [broadcast]
//! listen_port = 5001
//! write_timeout_ms = 2000
//!
//! [[broadcast.targets]]
//! ip = "192.168.1.20"
//! port = 6000
//!
//! [logging]
//! level = "info"
//! file = "scalebridge.log"
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scalebridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Trigger port: {}", config.trigger.port);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::error::ConfigError;

/// Largest accepted decimal-scaling exponent.
pub const MAX_DECIMAL_PLACES: u32 = 9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub serial_ports: Vec<PortProfile>,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub port: u16,
    /// How long a connection may stay silent before its request is abandoned.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl TriggerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Line settings and acquisition parameters for one logical scale port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortProfile {
    /// Logical name requested by trigger clients (`SEND:<name>`). Compared case-insensitively.
    pub name: String,
    /// OS device path. When unset the logical name is used (e.g. `COM3` on Windows).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub handshake: Handshake,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Raw payload is divided by `10^decimal_places`.
    #[serde(default)]
    pub decimal_places: u32,
}

fn default_data_bits() -> u8 {
    8
}

fn default_timeout_ms() -> u64 {
    20_000
}

impl PortProfile {
    pub fn device_path(&self) -> &str {
        self.device.as_deref().unwrap_or(&self.name)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handshake {
    #[default]
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Port accepting subscriber connections. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    /// A write slower than this drops the subscriber.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Outbound subscribers dialed once at startup.
    #[serde(default)]
    pub targets: Vec<TcpTarget>,
}

fn default_write_timeout_ms() -> u64 {
    2000
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            listen_port: None,
            write_timeout_ms: default_write_timeout_ms(),
            targets: Vec::new(),
        }
    }
}

impl BroadcastConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpTarget {
    pub ip: String,
    pub port: u16,
}

impl TcpTarget {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load, parse and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
        Self::from_toml(&content, path)
    }

    /// Parse and validate TOML text. `origin` is only used in error messages.
    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> anyhow::Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow::anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        if self.serial_ports.is_empty() {
            return Err(ConfigError::NoProfiles);
        }
        let mut seen = HashSet::new();
        for profile in &self.serial_ports {
            let name = profile.name.trim();
            if name.is_empty() || name.contains(':') {
                return Err(ConfigError::InvalidName);
            }
            if !seen.insert(name.to_ascii_uppercase()) {
                return Err(ConfigError::DuplicateProfile(profile.name.clone()));
            }
            if !(5..=8).contains(&profile.data_bits) {
                return Err(ConfigError::DataBits {
                    name: profile.name.clone(),
                    value: profile.data_bits,
                });
            }
            if profile.timeout_ms == 0 {
                return Err(ConfigError::ZeroTimeout {
                    name: profile.name.clone(),
                });
            }
            if profile.decimal_places > MAX_DECIMAL_PLACES {
                return Err(ConfigError::DecimalPlaces {
                    name: profile.name.clone(),
                    value: profile.decimal_places,
                    max: MAX_DECIMAL_PLACES,
                });
            }
        }
        Ok(())
    }

    /// Resolve a requested port name against the configured profiles.
    pub fn find_profile(&self, name: &str) -> Option<&PortProfile> {
        self.serial_ports.iter().find(|p| p.matches(name))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trigger: TriggerConfig {
                bind: default_bind(),
                port: 5000,
                request_timeout_ms: default_request_timeout_ms(),
            },
            serial_ports: vec![PortProfile {
                name: "COM3".to_string(),
                device: None,
                baud_rate: 9600,
                data_bits: 8,
                parity: Parity::None,
                stop_bits: StopBits::One,
                handshake: Handshake::None,
                timeout_ms: default_timeout_ms(),
                decimal_places: 2,
            }],
            broadcast: BroadcastConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("scalebridge.log".to_string()),
            },
        }
    }
}
