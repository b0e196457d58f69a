//! Connector configuration.
//!
//! Every section carries `#[serde(default)]`, so a partial file (or no file
//! at all) yields a runnable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use share_hub::{DeliverySettings, HubSettings, LivenessSettings, ReputationConfig};
use share_protocol::{AgentId, DEFAULT_RPC_PORT, DEFAULT_WS_PORT};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "SHARE_HUB_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub rpc: RpcConfig,
    pub websocket: WebSocketConfig,
    pub liveness: LivenessSettings,
    pub delivery: DeliverySettings,
    pub reputation: ReputationConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub bind_addr: String,
    pub max_connections: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{DEFAULT_RPC_PORT}"),
            max_connections: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub bind_addr: String,
    /// A `heartbeat` push is sent after this long without outbound traffic.
    pub heartbeat_interval_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: format!("127.0.0.1:{DEFAULT_WS_PORT}"),
            heartbeat_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Only agents listed in `credentials` may connect.
    #[default]
    Static,
    /// Any credential is accepted. Development only.
    Open,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub credentials: Vec<CredentialEntry>,
}

/// An issued API key, stored as the hex SHA-256 digest of the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub agent_id: AgentId,
    pub key_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Burst size.
    pub capacity: u32,
    /// Steady-state requests per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
            refill_per_sec: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl HubConfig {
    /// Resolve and load the configuration.
    ///
    /// Lookup order: `explicit` path, then `$SHARE_HUB_CONFIG`, then the
    /// per-user default location if that file exists, then built-in
    /// defaults. Returns the path actually read, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(config_path_from_env)
            .or_else(|| default_config_path().filter(|p| p.exists()));

        let config = match &path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok((config, path))
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            liveness: self.liveness.clone(),
            delivery: self.delivery.clone(),
            reputation: self.reputation.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.bind_addr.trim().is_empty() {
            return Err(invalid("rpc.bind_addr", "must not be empty"));
        }
        if self.rpc.max_connections == 0 {
            return Err(invalid("rpc.max_connections", "must be > 0"));
        }
        if self.websocket.enabled && self.websocket.bind_addr.trim().is_empty() {
            return Err(invalid("websocket.bind_addr", "must not be empty"));
        }
        if self.websocket.heartbeat_interval_secs == 0 {
            return Err(invalid("websocket.heartbeat_interval_secs", "must be > 0"));
        }
        if let Err(reason) = self.hub_settings().validate() {
            return Err(invalid("hub", reason));
        }
        if self.rate_limit.enabled {
            if self.rate_limit.capacity == 0 {
                return Err(invalid("rate_limit.capacity", "must be > 0"));
            }
            if !(self.rate_limit.refill_per_sec.is_finite() && self.rate_limit.refill_per_sec >= 0.0) {
                return Err(invalid("rate_limit.refill_per_sec", "must be a non-negative number"));
            }
        }
        for entry in &self.auth.credentials {
            if entry.agent_id.as_str().trim().is_empty() {
                return Err(invalid("auth.credentials.agent_id", "must not be empty"));
            }
            let digest_ok = entry.key_sha256.len() == 64
                && entry.key_sha256.chars().all(|c| c.is_ascii_hexdigit());
            if !digest_ok {
                return Err(invalid(
                    "auth.credentials.key_sha256",
                    format!("entry for {} is not a hex SHA-256 digest", entry.agent_id),
                ));
            }
        }
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `<config dir>/share-hub/hub.toml`, e.g. `~/.config/share-hub/hub.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("share-hub").join("hub.toml"))
}
