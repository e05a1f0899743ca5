//! Configuration management
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `config.{toml,json,yaml}` in [`get_config_dir`]
//! 3. `AMPLIPI_*` environment variables, `__` between nested keys
//!    (`AMPLIPI_CONTROLLER__HOST`, `AMPLIPI_POLLING__INTERVAL_SECS`)
//! 4. legacy shorthands `AMPLIPI_HOST`, `AMPLIPI_PORT` (controller) and `PORT` (HTTP)

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::entity::ReconcileContext;
use crate::volume::{VolumeRange, DEFAULT_MAX_DB, DEFAULT_MIN_DB};

const ENV_PREFIX: &str = "AMPLIPI";
const APP_DIR_NAME: &str = "amplipi-control";

/// Env vars handled by hand; kept out of the generic `AMPLIPI_*` mapping so
/// that `AMPLIPI_PORT` does not land on the top-level HTTP `port`.
const RESERVED_ENV: &[&str] = &["AMPLIPI_HOST", "AMPLIPI_PORT", "AMPLIPI_CONFIG_DIR"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,

    pub controller: ControllerConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub volume: VolumeConfig,

    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

fn default_port() -> u16 {
    8089
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub host: String,
    #[serde(default = "default_controller_port")]
    pub port: u16,
    #[serde(default = "default_api_path")]
    pub api_path: String,
    /// Web UI root; relative artwork is resolved against it.
    #[serde(default)]
    pub webapp: Option<String>,
    #[serde(default = "default_controller_name")]
    pub name: String,
    #[serde(default = "default_label")]
    pub vendor: String,
    #[serde(default = "default_label")]
    pub version: String,
}

fn default_controller_port() -> u16 {
    80
}

fn default_api_path() -> String {
    "/api".to_string()
}

fn default_controller_name() -> String {
    "AmpliPi".to_string()
}

fn default_label() -> String {
    "Unknown".to_string()
}

impl ControllerConfig {
    fn authority(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// REST API root, e.g. `http://amplipi.local/api`.
    pub fn base_url(&self) -> String {
        format!(
            "http://{}/{}",
            self.authority(),
            self.api_path.trim_matches('/')
        )
        .trim_end_matches('/')
        .to_string()
    }

    pub fn webapp_url(&self) -> String {
        match &self.webapp {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.authority()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Normalized increment for volume up/down
    #[serde(default = "default_volume_step")]
    pub volume_step: f64,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_volume_step() -> f64 {
    0.05
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            volume_step: default_volume_step(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeConfig {
    #[serde(default = "default_min_db")]
    pub min_db: f64,
    #[serde(default = "default_max_db")]
    pub max_db: f64,
}

fn default_min_db() -> f64 {
    DEFAULT_MIN_DB
}

fn default_max_db() -> f64 {
    DEFAULT_MAX_DB
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "amplipi".to_string()
}

impl Config {
    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.controller.host.trim().is_empty() {
            bail!("controller.host must not be empty");
        }
        if self.polling.interval_secs == 0 {
            bail!("polling.interval_secs must be greater than zero");
        }
        if !(self.polling.volume_step > 0.0 && self.polling.volume_step <= 1.0) {
            bail!(
                "polling.volume_step must be in (0, 1], got {}",
                self.polling.volume_step
            );
        }
        self.volume_range()?;
        if let Some(mqtt) = &self.mqtt {
            if mqtt.host.trim().is_empty() {
                bail!("mqtt.host must not be empty");
            }
            if mqtt.topic_prefix.is_empty() || mqtt.topic_prefix.contains(['+', '#']) {
                bail!("mqtt.topic_prefix '{}' is not a valid topic", mqtt.topic_prefix);
            }
        }
        Ok(())
    }

    pub fn volume_range(&self) -> Result<VolumeRange> {
        Ok(VolumeRange::new(self.volume.min_db, self.volume.max_db)?)
    }

    pub fn reconcile_context(&self) -> Result<Arc<ReconcileContext>> {
        Ok(Arc::new(ReconcileContext {
            volume_range: self.volume_range()?,
            artwork_base: self.controller.webapp_url(),
            controller_name: self.controller.name.clone(),
            volume_step: self.polling.volume_step,
        }))
    }
}

/// Get config directory (AMPLIPI_CONFIG_DIR or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AMPLIPI_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

fn prefixed_env() -> ::config::Map<String, String> {
    std::env::vars()
        .filter(|(key, _)| !RESERVED_ENV.contains(&key.as_str()))
        .collect()
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(prefixed_env())),
        );

    // Legacy controller shorthands
    if let Ok(host) = std::env::var("AMPLIPI_HOST") {
        builder = builder.set_override("controller.host", host)?;
    }
    if let Ok(port) = std::env::var("AMPLIPI_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("controller.port", port_num as i64)?;
        }
    }

    // Legacy PORT fallback (Docker, systemd units)
    if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
