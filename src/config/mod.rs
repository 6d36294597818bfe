//! # Configuration Management Module
//!
//! Typed configuration for the forwarder, loaded from a TOML file with serde. Every
//! section except `[telegram]` and `[[devices]]` may be omitted and falls back to its
//! defaults.
//!
//! ## Configuration Structure
//!
//! - [`TelegramConfig`] - bot credentials and request settings
//! - [`ForwarderConfig`] - polling cadence, deletion policy, shutdown budget
//! - [`SafetyConfig`] - delete-safety thresholds
//! - [`TimingConfig`] - per-command settle durations
//! - [`DeviceConfig`] - one entry per modem
//! - [`StorageConfig`] / [`LoggingConfig`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use smsgate::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!     for device in &config.devices {
//!         println!("{} on {}", device.name, device.port);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [telegram]
//! bot_token = "123456:ABC..."
//! chat_id = "-1001234567890"
//!
//! [forwarder]
//! poll_interval_secs = 10
//! delete_after_forward = true
//! banks = ["ME"]
//!
//! [[devices]]
//! name = "modem-1"
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! ```
//!
//! ## Environment Integration
//!
//! `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID` replace the file values when set, so
//! secrets can stay out of the config file.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::modem::CommandTiming;
use crate::monitor::MonitorSettings;
use crate::sms::{Bank, SmsSettings};

pub const PLACEHOLDER_TOKEN: &str = "YOUR_TELEGRAM_BOT_TOKEN";
pub const PLACEHOLDER_CHAT_ID: &str = "YOUR_TELEGRAM_CHAT_ID";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// Bot API root, without the `/bot<token>` part.
    pub api_base: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    pub parse_mode: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: PLACEHOLDER_TOKEN.to_string(),
            chat_id: PLACEHOLDER_CHAT_ID.to_string(),
            api_base: "https://api.telegram.org".to_string(),
            timeout_seconds: 10,
            parse_mode: "HTML".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub poll_interval_secs: u64,
    /// Call-check cadence; SMS polls run every `poll_interval / tick` iterations.
    pub tick_ms: u64,
    pub delete_after_forward: bool,
    pub banks: Vec<Bank>,
    /// Per-device budget when joining monitor tasks at shutdown.
    pub shutdown_timeout_secs: u64,
    /// Upper bound for one SMS poll cycle.
    pub poll_timeout_secs: u64,
    pub status_refresh_secs: u64,
    pub notify_startup: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            tick_ms: 100,
            delete_after_forward: true,
            banks: vec![Bank::Device],
            shutdown_timeout_secs: 2,
            poll_timeout_secs: 30,
            status_refresh_secs: 300,
            notify_startup: true,
        }
    }
}

impl ForwarderConfig {
    pub fn monitor_settings(&self) -> MonitorSettings {
        let tick = Duration::from_millis(self.tick_ms);
        MonitorSettings {
            tick,
            poll_every: MonitorSettings::ticks_per_poll(
                Duration::from_secs(self.poll_interval_secs),
                tick,
            ),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            status_refresh: Duration::from_secs(self.status_refresh_secs),
            banks: self.banks.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Largest index accepted as a real storage slot.
    pub max_valid_index: u32,
    /// Consecutive delete failures before deletion is disabled.
    pub delete_failure_threshold: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_valid_index: 1000,
            delete_failure_threshold: 5,
        }
    }
}

/// Settle durations in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub status: u64,
    pub list: u64,
    pub read: u64,
    pub delete: u64,
    pub bulk_delete: u64,
    pub registration_toggle: u64,
    pub call_query_delay: u64,
    pub open_settle: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            status: 500,
            list: 2000,
            read: 1000,
            delete: 1000,
            bulk_delete: 2000,
            registration_toggle: 300,
            call_query_delay: 200,
            open_settle: 500,
        }
    }
}

impl TimingConfig {
    pub fn command_timing(&self) -> CommandTiming {
        CommandTiming {
            status: Duration::from_millis(self.status),
            list: Duration::from_millis(self.list),
            read: Duration::from_millis(self.read),
            delete: Duration::from_millis(self.delete),
            bulk_delete: Duration::from_millis(self.bulk_delete),
            registration_toggle: Duration::from_millis(self.registration_toggle),
            call_query_delay: Duration::from_millis(self.call_query_delay),
            open_settle: Duration::from_millis(self.open_settle),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_read_timeout_ms() -> u64 {
    2000
}

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("smsgate.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Replace Telegram credentials with `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(chat) = lookup("TELEGRAM_CHAT_ID").filter(|v| !v.trim().is_empty()) {
            self.telegram.chat_id = chat;
        }
    }

    /// Full validation for `smsgate start`.
    pub fn validate(&self) -> Result<()> {
        self.validate_telegram()?;
        self.validate_runtime()
    }

    pub fn validate_telegram(&self) -> Result<()> {
        let token = self.telegram.bot_token.trim();
        if token.is_empty() || token == PLACEHOLDER_TOKEN {
            bail!("telegram.bot_token is not set (config file or TELEGRAM_BOT_TOKEN)");
        }
        let chat = self.telegram.chat_id.trim();
        if chat.is_empty() || chat == PLACEHOLDER_CHAT_ID {
            bail!("telegram.chat_id is not set (config file or TELEGRAM_CHAT_ID)");
        }
        if self.telegram.timeout_seconds == 0 {
            bail!("telegram.timeout_seconds must be greater than zero");
        }
        Ok(())
    }

    /// Everything except the Telegram credentials.
    pub fn validate_runtime(&self) -> Result<()> {
        if self.devices.is_empty() {
            bail!("no devices configured");
        }
        let mut names = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            if device.name.trim().is_empty() || device.port.trim().is_empty() {
                bail!("device {} is missing 'name' or 'port'", i);
            }
            if !names.insert(device.name.as_str()) {
                bail!("duplicate device name '{}'", device.name);
            }
            if device.baud_rate == 0 {
                bail!("device '{}' has baud_rate 0", device.name);
            }
        }
        let f = &self.forwarder;
        if f.poll_interval_secs == 0 || f.tick_ms == 0 || f.poll_timeout_secs == 0 {
            bail!("forwarder intervals must be greater than zero");
        }
        if f.tick_ms > f.poll_interval_secs.saturating_mul(1000) {
            bail!(
                "forwarder.tick_ms ({}) exceeds poll interval ({}s)",
                f.tick_ms,
                f.poll_interval_secs
            );
        }
        if f.banks.is_empty() {
            bail!("forwarder.banks must name at least one storage bank");
        }
        if self.safety.delete_failure_threshold == 0 {
            bail!("safety.delete_failure_threshold must be greater than zero");
        }
        Ok(())
    }

    pub fn sms_settings(&self) -> SmsSettings {
        SmsSettings {
            banks: self.forwarder.banks.clone(),
            max_valid_index: self.safety.max_valid_index,
            delete_failure_threshold: self.safety.delete_failure_threshold,
        }
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            telegram: TelegramConfig::default(),
            forwarder: ForwarderConfig::default(),
            safety: SafetyConfig::default(),
            timing: TimingConfig::default(),
            devices: vec![DeviceConfig {
                name: "modem-1".to_string(),
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: default_baud_rate(),
                read_timeout_ms: default_read_timeout_ms(),
            }],
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
