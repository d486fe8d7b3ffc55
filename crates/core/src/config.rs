use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::ParamDefaults;
use crate::device::ByteOrder;
use crate::listener::TableKeys;
use crate::supervisor::SupervisorSettings;

/// Largest strip the Art-Net output will address (64 full universes)
pub const MAX_LED_COUNT: usize = 170 * 64;

/// Configuration manager for bling settings
/// Settings are stored as JSON, in bling.json in the working directory by default
pub struct ConfigManager {
    config_path: PathBuf,
    config: BlingConfig,
    created_at: Option<String>,
}

/// Everything the binary needs to wire a listener to a strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlingConfig {
    /// Table server address, host:port
    pub server: String,
    pub led_count: usize,
    /// Upper bound on waiting for a cancelled animation; null waits forever
    pub cancel_timeout_ms: Option<u64>,
    pub reconnect_delay_ms: u64,
    pub keys: TableKeys,
    pub defaults: ParamDefaults,
    pub output: OutputConfig,
}

impl Default for BlingConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:5810".to_string(),
            led_count: 120,
            cancel_timeout_ms: Some(2000),
            reconnect_delay_ms: 1000,
            keys: TableKeys::default(),
            defaults: ParamDefaults::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Art-Net output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub bind: String,
    pub destination: String,
    pub universe: u16,
    pub byte_order: ByteOrder,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:0".to_string(),
            destination: "255.255.255.255:6454".to_string(),
            universe: 0,
            byte_order: ByteOrder::Grb,
        }
    }
}

impl BlingConfig {
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            cancel_timeout: self.cancel_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Parsed (bind, destination) addresses for the Art-Net socket
    pub fn output_addrs(&self) -> Result<(SocketAddr, SocketAddr), ConfigError> {
        let parse = |name: &str, value: &str| {
            value
                .parse::<SocketAddr>()
                .map_err(|e| {
                    ConfigError::ValidationError(vec![format!("{} {:?}: {}", name, value, e)])
                })
        };
        Ok((
            parse("output.bind", &self.output.bind)?,
            parse("output.destination", &self.output.destination)?,
        ))
    }
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: BlingConfig,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// Create a new configuration manager
    /// If no path is provided, defaults to 'bling.json' in the current working directory
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from("bling.json"));

        Self {
            config_path,
            config: BlingConfig::default(),
            created_at: None,
        }
    }

    /// Load settings from the configuration file.
    /// A missing file is created with default settings.
    pub fn load(&mut self) -> Result<BlingConfig, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.config.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match {}; missing settings use defaults",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate(&config_file.settings).map_err(ConfigError::ValidationError)?;

        self.created_at = Some(config_file.created_at);
        self.config = config_file.settings;
        Ok(self.config.clone())
    }

    /// Save current settings to the configuration file
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = self.created_at.get_or_insert_with(|| now.clone()).clone();
        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.config.clone(),
            created_at,
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Replace settings and save to file
    pub fn update(&mut self, config: BlingConfig) -> Result<(), ConfigError> {
        Self::validate(&config).map_err(ConfigError::ValidationError)?;
        self.config = config;
        self.save()
    }

    pub fn config(&self) -> &BlingConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Check settings, collecting every problem rather than stopping at the first
    pub fn validate(config: &BlingConfig) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if config.server.trim().is_empty() {
            errors.push("server must not be empty".to_string());
        }

        if config.led_count == 0 || config.led_count > MAX_LED_COUNT {
            errors.push(format!("led_count must be between 1 and {}", MAX_LED_COUNT));
        }

        if config.reconnect_delay_ms == 0 {
            errors.push("reconnect_delay_ms must be greater than 0".to_string());
        }

        if config.keys.command == config.keys.status {
            errors.push(format!(
                "keys.status must differ from keys.command ({})",
                config.keys.command
            ));
        }

        if config.output.universe > 0x7fff {
            errors.push("output.universe must be at most 32767".to_string());
        }

        if let Err(ConfigError::ValidationError(mut e)) = config.output_addrs() {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Failed to parse config file: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Config validation errors: {}", .0.join(", "))]
    ValidationError(Vec<String>),
}
