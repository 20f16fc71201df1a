//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section is optional; missing keys fall back to the defaults below.

use chrono::format::{Item, StrftimeItems};
use serde::de::Error;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{GroundlinkError, Result};
use crate::telemetry::parser::ChannelRange;
use crate::telemetry::schema::Channel;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub telemetry: TelemetryConfig,
    pub validation: ValidationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// USB identity of an accepted receiver
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    /// Fixed port; empty means locate by `allowed_devices`
    pub port: String,

    pub baud_rate: u32,

    /// Longest wait for one frame
    pub timeout_ms: u64,

    /// Back-off between connection attempts
    pub reconnect_interval_ms: u64,

    pub allowed_devices: Vec<UsbId>,
}

/// Flight log configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_dir: String,
    pub auto_create_directory: bool,
    pub file_prefix: String,
    /// chrono format string for the run-start part of the file name
    pub filename_format: String,
    pub include_header: bool,
    pub delimiter: char,
    pub flush_interval: usize,
    pub float_precision: u32,
}

/// Range validation configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ValidationConfig {
    pub enabled: bool,
    /// Channel name -> `[min, max]`
    pub ranges: BTreeMap<String, [f64; 2]>,
}

/// Live update server configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub send_timeout_ms: u64,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Optional directory for a daily-rolling diagnostic log
    pub directory: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { String::new() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_reconnect_interval_ms() -> u64 { 5000 }
fn default_allowed_devices() -> Vec<UsbId> {
    vec![
        UsbId { vid: 0x2341, pid: 0x0043 }, // Arduino Uno
        UsbId { vid: 0x2341, pid: 0x0001 }, // Arduino Uno (old)
        UsbId { vid: 0x1A86, pid: 0x7523 }, // CH340 clones
        UsbId { vid: 0x239A, pid: 0x8022 }, // Adafruit Feather
    ]
}

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./flight_data".to_string() }
fn default_auto_create_directory() -> bool { true }
fn default_file_prefix() -> String { "flight".to_string() }
fn default_filename_format() -> String { "%Y-%m-%d_%H-%M-%S".to_string() }
fn default_include_header() -> bool { true }
fn default_delimiter() -> char { ',' }
fn default_flush_interval() -> usize { 10 }
fn default_float_precision() -> u32 { 6 }

fn default_bind_address() -> String { "0.0.0.0:8080".to_string() }
fn default_send_timeout_ms() -> u64 { 1000 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            allowed_devices: default_allowed_devices(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            auto_create_directory: default_auto_create_directory(),
            file_prefix: default_file_prefix(),
            filename_format: default_filename_format(),
            include_header: default_include_header(),
            delimiter: default_delimiter(),
            flush_interval: default_flush_interval(),
            float_precision: default_float_precision(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use groundlink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load `path` if it exists, otherwise use validated defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("No config at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Range table for the parser, empty when validation is off
    pub fn channel_ranges(&self) -> Vec<ChannelRange> {
        if !self.validation.enabled {
            return Vec::new();
        }
        self.validation
            .ranges
            .iter()
            .filter_map(|(name, [min, max])| {
                Channel::from_name(name).map(|channel| ChannelRange {
                    channel,
                    min: *min,
                    max: *max,
                })
            })
            .collect()
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() && self.serial.allowed_devices.is_empty() {
            return Err(invalid("serial port or allowed_devices must be set"));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.serial.reconnect_interval_ms == 0 || self.serial.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.file_prefix.is_empty() {
            return Err(invalid("file_prefix cannot be empty"));
        }

        let mut items = StrftimeItems::new(&self.telemetry.filename_format);
        if items.any(|item| matches!(item, Item::Error)) {
            return Err(invalid("filename_format is not a valid strftime pattern"));
        }

        if self.telemetry.flush_interval == 0 {
            return Err(invalid("flush_interval must be greater than 0"));
        }

        if self.telemetry.float_precision > 15 {
            return Err(invalid("float_precision must be between 0 and 15"));
        }

        if matches!(self.telemetry.delimiter, '"' | '\n' | '\r') {
            return Err(invalid("delimiter cannot be a quote or line break"));
        }

        // Numeric cells are written unquoted
        if appears_in_number(self.telemetry.delimiter) {
            return Err(invalid("delimiter cannot be a character used in numbers"));
        }

        for (name, [min, max]) in &self.validation.ranges {
            if Channel::from_name(name).is_none() {
                return Err(invalid(format!("validation range for unknown channel '{}'", name)));
            }
            if min > max {
                return Err(invalid(format!("validation range for '{}' has min > max", name)));
            }
        }

        if self.server.bind_address.is_empty() {
            return Err(invalid("server bind_address cannot be empty"));
        }

        if self.server.send_timeout_ms == 0 || self.server.send_timeout_ms > 60000 {
            return Err(invalid("send_timeout_ms must be between 1 and 60000"));
        }

        Ok(())
    }
}

/// Characters a rendered integer or float can contain, `inf` and `NaN` included
fn appears_in_number(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E' | 'i' | 'n' | 'f' | 'a' | 'N')
}

fn invalid(msg: impl std::fmt::Display) -> GroundlinkError {
    GroundlinkError::Config(toml::de::Error::custom(msg))
}
