//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::port::{validate_baud_rate, DataBits, ModemLineRequest, Parity, StopBits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line defaults
    pub serial: SerialConfig,
    /// Bridge session defaults
    pub session: SessionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.serial.validate()?;
        self.session.validate()?;
        self.logging.validate()
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate when the command line gives none
    pub default_baud: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    /// Ignore modem status lines (CLOCAL)
    pub ignore_modem_lines: bool,
    /// Discard stale buffered data after opening
    pub flush_on_open: bool,
    pub dtr: ModemLineRequest,
    pub rts: ModemLineRequest,
    /// Short names for device paths
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: 115200,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            ignore_modem_lines: true,
            flush_on_open: true,
            dtr: ModemLineRequest::Unchanged,
            rts: ModemLineRequest::Unchanged,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn validate(&self) -> ConfigResult<()> {
        validate_baud_rate(self.default_baud)
            .map_err(|e| ConfigError::validation("serial.default_baud", e.to_string()))?;
        if let Some((alias, _)) = self.port_aliases.iter().find(|(_, path)| path.is_empty()) {
            return Err(ConfigError::validation(
                format!("serial.port_aliases.{alias}"),
                "empty device path",
            ));
        }
        Ok(())
    }
}

/// Bridge session configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Scheduling tick in microseconds
    pub tick_us: u64,
    pub local_echo: bool,
    pub timestamps: bool,
    pub color: bool,
    /// Show control characters as Unicode control pictures
    pub control_chars: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_us: 1000,
            local_echo: false,
            timestamps: false,
            color: false,
            control_chars: false,
        }
    }
}

impl SessionConfig {
    /// Get the tick as Duration
    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_us)
    }

    fn validate(&self) -> ConfigResult<()> {
        if !(1..=1_000_000).contains(&self.tick_us) {
            return Err(ConfigError::validation(
                "session.tick_us",
                format!("{} is outside 1..=1000000", self.tick_us),
            ));
        }
        Ok(())
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error", "off"
    pub level: String,
    /// Log format: "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    const LEVELS: [&'static str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

    fn validate(&self) -> ConfigResult<()> {
        if !Self::LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logging.level",
                format!("unknown level '{}'", self.level),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}
