//! Bridge configuration – reads/writes `~/.quayos/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quayos_middleware::MqttSettings;
use quayos_middleware::mqtt_adapter::{DEFAULT_BROKER_URL, parse_broker_url, qos_from_level};
use quayos_middleware::topic::{DEFAULT_BASE_TOPIC, TopicLayout};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Smallest keep-alive rumqttc accepts.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Persisted bridge configuration.  Every field has a default, so an empty
/// file is valid.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Prefix of every turtle status topic.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Buffered registry events per bus topic.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Broker password (plain text – restrict permissions on the file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("broker_url", &self.broker_url)
            .field("base_topic", &self.base_topic)
            .field("client_id", &self.client_id)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("qos", &self.qos)
            .field("event_bus_capacity", &self.event_bus_capacity)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .finish()
    }
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}
fn default_base_topic() -> String {
    DEFAULT_BASE_TOPIC.to_string()
}
fn default_client_id() -> String {
    "quayos-bridge".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_qos() -> u8 {
    1
}
fn default_event_bus_capacity() -> usize {
    quayos_middleware::bus::DEFAULT_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            base_topic: default_base_topic(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            qos: default_qos(),
            event_bus_capacity: default_event_bus_capacity(),
            username: None,
            password: None,
        }
    }
}

impl Config {
    /// Reject values the transport would refuse at connect time.
    pub fn validate(&self) -> Result<(), String> {
        parse_broker_url(&self.broker_url).map_err(|e| e.to_string())?;
        TopicLayout::new(self.base_topic.as_str()).map_err(|e| e.to_string())?;
        qos_from_level(self.qos).map_err(|e| e.to_string())?;
        if self.client_id.trim().is_empty() {
            return Err("client_id must not be empty".to_string());
        }
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(format!(
                "keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}, got {}",
                self.keep_alive_secs
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be positive".to_string());
        }
        if self.event_bus_capacity == 0 {
            return Err("event_bus_capacity must be positive".to_string());
        }
        Ok(())
    }

    pub fn topic_layout(&self) -> Result<TopicLayout, String> {
        TopicLayout::new(self.base_topic.as_str()).map_err(|e| e.to_string())
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            broker_url: self.broker_url.clone(),
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            qos: self.qos,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Return the path to `~/.quayos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".quayos").join("config.toml")
}

/// Load the config from disk and apply environment overrides.
///
/// On first run, when no file exists yet, the defaults are written to
/// [`config_path`] so operators have a file to edit.
pub fn load() -> Result<Config, String> {
    let path = config_path();
    let mut cfg = match load_from(&path)? {
        Some(cfg) => cfg,
        None => {
            let cfg = Config::default();
            match save_to(&cfg, &path) {
                Ok(()) => info!(path = %path.display(), "wrote default configuration"),
                Err(e) => warn!(error = %e, "could not write default configuration"),
            }
            cfg
        }
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `QUAYOS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `QUAYOS_BROKER_URL` | `broker_url` |
/// | `QUAYOS_BASE_TOPIC` | `base_topic` |
/// | `QUAYOS_CLIENT_ID` | `client_id` |
/// | `QUAYOS_QOS` | `qos` |
/// | `QUAYOS_KEEP_ALIVE_SECS` | `keep_alive_secs` |
///
/// Numeric values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("QUAYOS_BROKER_URL") {
        cfg.broker_url = v;
    }
    if let Ok(v) = std::env::var("QUAYOS_BASE_TOPIC") {
        cfg.base_topic = v;
    }
    if let Ok(v) = std::env::var("QUAYOS_CLIENT_ID") {
        cfg.client_id = v;
    }
    if let Ok(v) = std::env::var("QUAYOS_QOS")
        && let Ok(qos) = v.parse::<u8>()
    {
        cfg.qos = qos;
    }
    if let Ok(v) = std::env::var("QUAYOS_KEEP_ALIVE_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.keep_alive_secs = secs;
    }
}

/// Save the config to a specific path, creating the parent directory with
/// owner-only permissions on Unix.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
