// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::connection_string::ConnectionParams;
use crate::publisher::PublisherConfig;
use crate::subscriber::{Binding, SubscriberConfig};
use crate::transport::ExchangeType;

pub const CONFIG_FILE_NAME: &str = "telemetry_mq.json";
pub const ENV_PREFIX: &str = "TELEMETRY_MQ_";

// Configuration structures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_connection_string")]
    pub connection_string: String,
    #[serde(default)]
    pub publisher: PublisherSettings,
    #[serde(default)]
    pub subscriber: SubscriberSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherSettings {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declare_exchange: Option<ExchangeType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberSettings {
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<Binding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
}

// Default values
fn default_connection_string() -> String {
    "host=localhost;port=5672;user=guest;pass=guest;vhost=/".to_string()
}
fn default_exchange() -> String { "diagnostics".to_string() }
fn default_routing_key() -> String { "traces".to_string() }
fn default_queue() -> String { "traces".to_string() }
fn default_connect_timeout() -> u64 { 10_000 }
fn default_publish_timeout() -> u64 { 5_000 }

impl Default for MessagingConfig {
    fn default() -> Self {
        MessagingConfig {
            connection_string: default_connection_string(),
            publisher: PublisherSettings::default(),
            subscriber: SubscriberSettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        PublisherSettings {
            exchange: default_exchange(),
            routing_key: default_routing_key(),
            declare_exchange: None,
        }
    }
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        SubscriberSettings {
            queue: default_queue(),
            exclusive: false,
            binding: None,
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        TimeoutSettings {
            connect_timeout_ms: default_connect_timeout(),
            publish_timeout_ms: default_publish_timeout(),
        }
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value {:?} for {}{}", value, ENV_PREFIX, name))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Invalid value {:?} for {}{}", value, ENV_PREFIX, name)),
    }
}

impl MessagingConfig {
    /// Finds the configuration file, loads it and applies environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = find_config_file()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`MessagingConfig::load`], but starts from the defaults when no
    /// configuration file exists.
    pub fn load_or_default() -> Result<Self> {
        let mut config = match find_config_file() {
            Ok(path) => Self::load_from(&path)?,
            Err(_) => {
                info!("No {} found, using default configuration", CONFIG_FILE_NAME);
                Self::default()
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(path)
            .context(format!("Failed to read config file at {}", path.display()))?;

        let config: MessagingConfig = serde_json::from_str(&config_content)
            .context("Configuration file contains invalid JSON or missing required fields")?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reads `.env` if present, then applies `TELEMETRY_MQ_*` variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        dotenv::dotenv().ok();
        self.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    /// Applies overrides from `lookup`, which receives variable names without the prefix.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("CONNECTION_STRING") {
            self.connection_string = value;
        }
        if let Some(value) = lookup("EXCHANGE") {
            self.publisher.exchange = value;
        }
        if let Some(value) = lookup("ROUTING_KEY") {
            self.publisher.routing_key = value;
        }
        if let Some(value) = lookup("QUEUE") {
            self.subscriber.queue = value;
        }
        if let Some(value) = lookup("EXCLUSIVE") {
            self.subscriber.exclusive = parse_flag("EXCLUSIVE", &value)?;
        }
        if let Some(value) = lookup("CONNECT_TIMEOUT_MS") {
            self.timeouts.connect_timeout_ms = parse_var("CONNECT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("PUBLISH_TIMEOUT_MS") {
            self.timeouts.publish_timeout_ms = parse_var("PUBLISH_TIMEOUT_MS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            return Err(anyhow!("Configuration error: connection_string cannot be empty"));
        }
        self.connection_params()?;

        if self.publisher.exchange.is_empty() && self.publisher.routing_key.is_empty() {
            return Err(anyhow!(
                "Configuration error: publisher.exchange and publisher.routing_key \
                     cannot both be empty"
            ));
        }
        if self.subscriber.queue.is_empty() {
            return Err(anyhow!("Configuration error: subscriber.queue cannot be empty"));
        }
        if self.timeouts.connect_timeout_ms == 0 || self.timeouts.publish_timeout_ms == 0 {
            return Err(anyhow!("Configuration error: timeouts must be greater than zero"));
        }
        Ok(())
    }

    pub fn connection_params(&self) -> Result<ConnectionParams> {
        ConnectionParams::parse(&self.connection_string)
            .context("Configuration error: connection_string")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connect_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.publish_timeout_ms)
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        let mut config = PublisherConfig::new(&self.publisher.exchange, &self.publisher.routing_key)
            .with_timeouts(self.connect_timeout(), self.publish_timeout());
        if let Some(kind) = self.publisher.declare_exchange {
            config = config.declare_exchange(kind);
        }
        config
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        let mut config = SubscriberConfig::new(&self.subscriber.queue)
            .exclusive(self.subscriber.exclusive)
            .with_connect_timeout(self.connect_timeout());
        if let Some(binding) = &self.subscriber.binding {
            config = config.bind(binding.clone());
        }
        config
    }
}

// Configuration file lookup
pub fn find_config_file() -> Result<PathBuf> {
    let local = Path::new(CONFIG_FILE_NAME).to_path_buf();
    let locations = [
        ("Current directory", local),
        ("Current directory (alternative)", Path::new("config").join(CONFIG_FILE_NAME)),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path.clone());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!(
        "Could not find {} in the current directory, config/ or the home directory",
        CONFIG_FILE_NAME
    ))
}

pub fn create_default_config_file(path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&MessagingConfig::default())
        .context("Failed to serialize default configuration")?;

    // Create parent directories if they don't exist
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory at {}", parent.display()))?;
        }
    }

    fs::write(path, json)
        .context(format!("Failed to write configuration to {}", path.display()))?;

    info!("Created default configuration file at: {}", path.display());
    Ok(())
}
