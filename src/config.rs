//! Configuration file support for the boiler monitor.
//!
//! Loads settings from `~/.config/hargassner-monitor/config.toml` on Linux
//! (or platform-appropriate location on other OSes). Command line arguments
//! and environment variables override the file, see `main.rs`.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::bus::MqttBusConfig;
use crate::homie::{DEFAULT_BASE_TOPIC, DEFAULT_DEVICE_ID, DEFAULT_DEVICE_NAME};
use crate::source::{Parity, SerialConfig};

/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Serial line settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    /// Serial device path.
    pub device: String,

    pub baud_rate: u32,

    pub parity: Parity,

    pub data_bits: u8,

    pub stop_bits: u8,

    /// Apply the line settings with `stty` before opening the device.
    pub configure: bool,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 19200,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            configure: true,
        }
    }
}

/// MQTT broker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    /// Broker address, e.g. `tcp://localhost:1883`.
    pub broker: String,

    pub client_id: String,

    pub username: String,

    pub password: String,

    /// Topic root of the Homie device.
    pub base_topic: String,

    /// Homie device id.
    pub device_id: String,

    /// Homie device name.
    pub device_name: String,

    /// Keep alive interval in seconds.
    pub keep_alive: u64,

    /// Delay between reconnection attempts in seconds.
    pub reconnect_delay: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker: format!("tcp://localhost:{}", DEFAULT_MQTT_PORT),
            client_id: "hargassner-monitor".to_string(),
            username: String::new(),
            password: String::new(),
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            keep_alive: 30,
            reconnect_delay: 5,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Port for metrics, readiness and fault administration.
    pub port: u16,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialSection,

    pub mqtt: MqttSection,

    pub http: HttpSection,

    /// Print statistics every N seconds (0 = never).
    pub stats_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialSection::default(),
            mqtt: MqttSection::default(),
            http: HttpSection::default(),
            stats_interval: 300,
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hargassner-monitor/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        let serial = &self.serial;
        if serial.device.is_empty() {
            bail!("Serial device must not be empty");
        }
        if serial.baud_rate == 0 {
            bail!("Invalid baud rate: {}", serial.baud_rate);
        }
        if !(5..=8).contains(&serial.data_bits) {
            bail!("Invalid data bits: {} (expected 5-8)", serial.data_bits);
        }
        if !(1..=2).contains(&serial.stop_bits) {
            bail!("Invalid stop bits: {} (expected 1 or 2)", serial.stop_bits);
        }
        parse_broker_url(&self.mqtt.broker)
            .map_err(|e| anyhow::anyhow!("Invalid MQTT broker: {}", e))?;
        Ok(())
    }

    /// Serial source settings.
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            device: self.serial.device.clone().into(),
            baud_rate: self.serial.baud_rate,
            parity: self.serial.parity,
            data_bits: self.serial.data_bits,
            stop_bits: self.serial.stop_bits,
            configure: self.serial.configure,
        }
    }

    /// MQTT bus settings.
    pub fn mqtt_config(&self) -> MqttBusConfig {
        MqttBusConfig {
            broker: self.mqtt.broker.clone(),
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive),
            reconnect_delay: Duration::from_secs(self.mqtt.reconnect_delay),
        }
    }
}

/// Parse a broker address into host and port.
///
/// Accepts `tcp://host:port`, `mqtt://host:port`, `host:port` and `host`;
/// the port defaults to 1883.
pub fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let url = url.trim();
    let address = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    if address.contains("://") {
        bail!("unsupported scheme in broker address: {}", url);
    }

    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("invalid port in broker address: {}", url))?;
            (host, port)
        }
        None => (address, DEFAULT_MQTT_PORT),
    };

    if host.is_empty() {
        bail!("missing host in broker address: {}", url);
    }

    Ok((host.to_string(), port))
}
