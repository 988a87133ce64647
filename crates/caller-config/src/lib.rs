//! Configuration for the calling station.
//!
//! A TOML config file (backend, broker and station binding) merged with
//! `CALLER_` environment overrides, plus the small state file that
//! remembers the last broker parameters between runs. Translates into
//! `caller_core::SessionConfig` and the session's org / user binding.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use caller_core::{Org, Room, SessionConfig, User};

/// Table in the state file holding the last broker parameters.
pub const MQTT_STATE_KEY: &str = "mqtt_config";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("station is not bound: {what} missing from config")]
    Unbound { what: &'static str },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub broker: Broker,

    #[serde(default)]
    pub station: Station,

    #[serde(default)]
    pub timing: Timing,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Default tracing filter when neither `-v` nor `RUST_LOG` is given.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            log_level: default_log_level(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_log_level() -> String {
    "warn".into()
}

/// Triage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Backend {
    /// Base URL (e.g., "https://triage.example.org").
    #[serde(default)]
    pub url: String,

    /// Session token (plaintext, prefer `token_env` or `CALLER_TOKEN`).
    pub token: Option<String>,

    /// Environment variable name holding the token.
    pub token_env: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            token_env: None,
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    15
}

/// Message broker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Broker {
    #[serde(default)]
    pub host: String,

    /// Plain MQTT port, kept for the record; the station speaks WebSocket.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    #[serde(default)]
    pub use_tls: bool,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Fixed broker client id; generated per process when absent.
    pub client_id: Option<String>,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            ws_port: default_ws_port(),
            use_tls: false,
            ws_path: default_ws_path(),
            client_id: None,
        }
    }
}

fn default_port() -> u16 {
    1883
}
fn default_ws_port() -> u16 {
    8083
}
fn default_ws_path() -> String {
    "/mqtt".into()
}

/// Who this station is signed in as, and where.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Station {
    #[serde(default)]
    pub org_id: i64,
    #[serde(default)]
    pub org_code: String,
    #[serde(default)]
    pub org_name: String,
    #[serde(default)]
    pub dept_id: i64,

    /// Doctor (user) id.
    pub doctor_id: Option<i64>,
    #[serde(default)]
    pub doctor_name: String,
    #[serde(default)]
    pub account: String,

    pub room_id: Option<i64>,
    #[serde(default)]
    pub room_name: String,
}

/// Session timing knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timing {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
    #[serde(default = "default_link_wait_secs")]
    pub link_wait_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_ms: default_reconnect_ms(),
            link_wait_secs: default_link_wait_secs(),
            page_size: default_page_size(),
        }
    }
}

fn default_heartbeat_secs() -> u64 {
    30
}
fn default_reconnect_ms() -> u64 {
    1000
}
fn default_link_wait_secs() -> u64 {
    5
}
fn default_page_size() -> u32 {
    caller_core::config::DEFAULT_PAGE_SIZE
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "caller", "caller")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where the station remembers state between runs.
pub fn state_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("state.toml"),
        |dirs| dirs.data_dir().join("state.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("caller");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys use `__` between levels: `CALLER_BROKER__HOST`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CALLER_").split("__").ignore(&["token"]));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Keyring service name for stored backend tokens.
pub const KEYRING_SERVICE: &str = "caller";

fn keyring_account(org_code: &str) -> String {
    format!("{org_code}/token")
}

/// Resolve the backend token: `token_env` → `CALLER_TOKEN` → keyring →
/// plaintext.
pub fn resolve_token(cfg: &Config) -> Option<SecretString> {
    if let Some(val) = cfg
        .backend
        .token_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
    {
        return Some(SecretString::from(val));
    }
    if let Ok(val) = std::env::var("CALLER_TOKEN") {
        return Some(SecretString::from(val));
    }
    if !cfg.station.org_code.is_empty() {
        if let Ok(entry) =
            keyring::Entry::new(KEYRING_SERVICE, &keyring_account(&cfg.station.org_code))
        {
            if let Ok(secret) = entry.get_password() {
                return Some(SecretString::from(secret));
            }
        }
    }
    cfg.backend.token.clone().map(SecretString::from)
}

/// Store the backend token for `org_code` in the system keyring.
pub fn store_token(org_code: &str, token: &str) -> Result<(), ConfigError> {
    let keyring_err = |e: keyring::Error| ConfigError::Validation {
        field: "keyring".into(),
        reason: e.to_string(),
    };
    keyring::Entry::new(KEYRING_SERVICE, &keyring_account(org_code))
        .map_err(keyring_err)?
        .set_password(token)
        .map_err(keyring_err)
}

// ── Translation to core types ───────────────────────────────────────

impl Config {
    /// Parsed backend URL.
    pub fn backend_url(&self) -> Result<url::Url, ConfigError> {
        if self.backend.url.is_empty() {
            return Err(ConfigError::Unbound { what: "backend.url" });
        }
        self.backend
            .url
            .parse()
            .map_err(|_| ConfigError::Validation {
                field: "backend.url".into(),
                reason: format!("invalid URL: {}", self.backend.url),
            })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            client_id: self.broker.client_id.clone(),
            heartbeat_period: Duration::from_secs(self.timing.heartbeat_secs.max(1)),
            reconnect_period: Duration::from_millis(self.timing.reconnect_ms),
            link_wait: Duration::from_secs(self.timing.link_wait_secs),
            ws_path: self.broker.ws_path.clone(),
            page_size: self.timing.page_size.max(1),
            ..SessionConfig::default()
        }
    }

    pub fn org(&self) -> Result<Org, ConfigError> {
        if self.station.org_code.is_empty() {
            return Err(ConfigError::Unbound {
                what: "station.org_code",
            });
        }
        Ok(Org {
            org_id: self.station.org_id,
            org_code: self.station.org_code.clone(),
            org_name: self.station.org_name.clone(),
            dept_id: self.station.dept_id,
        })
    }

    /// The signed-in doctor, when configured.
    pub fn user(&self) -> Option<User> {
        self.station.doctor_id.map(|id| User {
            id,
            account: self.station.account.clone(),
            nick_name: self.station.doctor_name.clone(),
        })
    }

    pub fn room(&self) -> Option<Room> {
        self.station.room_id.map(|id| Room {
            id,
            name: self.station.room_name.clone(),
            dept_id: self.station.dept_id,
            ..Room::default()
        })
    }
}

// ── Persisted broker parameters ─────────────────────────────────────

/// Broker parameters remembered from the last linked session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MqttParams {
    pub host: String,
    pub port: u16,
    pub ws_port: u16,
    pub use_tls: bool,
    pub org_code: String,
    pub org_id: i64,
    /// Milliseconds since the Unix epoch when these were saved.
    pub timestamp: i64,
}

impl MqttParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            host: cfg.broker.host.clone(),
            port: cfg.broker.port,
            ws_port: cfg.broker.ws_port,
            use_tls: cfg.broker.use_tls,
            org_code: cfg.station.org_code.clone(),
            org_id: cfg.station.org_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Last broker parameters, or `None` when there was no prior session.
pub fn load_mqtt_params() -> Result<Option<MqttParams>, ConfigError> {
    load_mqtt_params_from(&state_path())
}

pub fn load_mqtt_params_from(path: &Path) -> Result<Option<MqttParams>, ConfigError> {
    let mut table = match read_state(path)? {
        Some(table) => table,
        None => return Ok(None),
    };
    let Some(value) = table.remove(MQTT_STATE_KEY) else {
        return Ok(None);
    };
    value
        .try_into()
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn save_mqtt_params(params: &MqttParams) -> Result<(), ConfigError> {
    save_mqtt_params_to(&state_path(), params)
}

/// Write `params` under `[mqtt_config]`, keeping any other state.
pub fn save_mqtt_params_to(path: &Path, params: &MqttParams) -> Result<(), ConfigError> {
    let mut table = read_state(path)?.unwrap_or_default();
    table.insert(MQTT_STATE_KEY.into(), toml::Value::try_from(params)?);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(&table)?)?;
    Ok(())
}

/// Drop the remembered broker parameters. Missing state is fine.
pub fn clear_mqtt_params_at(path: &Path) -> Result<(), ConfigError> {
    let Some(mut table) = read_state(path)? else {
        return Ok(());
    };
    if table.remove(MQTT_STATE_KEY).is_some() {
        std::fs::write(path, toml::to_string_pretty(&table)?)?;
    }
    Ok(())
}

fn read_state(path: &Path) -> Result<Option<toml::Table>, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    raw.parse::<toml::Table>()
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
