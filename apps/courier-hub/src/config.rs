use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::ConfigStore;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Config file used when `COURIER_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "courier/config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config found at {0}")]
    NotFound(String),
    #[error("a default config has been written to {0}, please edit it")]
    DefaultWritten(String),
    #[error("config I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config at {location} is not valid JSON: {source}")]
    Parse {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Courier configuration, stored as JSON.
///
/// `repo`, `ref`, `poll_time_seconds` and `data_folder` belong to the update
/// poller that shares this file; the hub only reads the gateway fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub poll_time_seconds: u64,
    /// Route the WebSocket endpoint is mounted on.
    pub web_socket_path: String,
    /// Shared secret every peer sends as its first frame.
    pub authentication_key: String,
    pub data_folder: String,
    /// Port the HTTP server binds to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-session outbound queue size; a session whose queue fills is dropped.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Number of recent message ids remembered for dedup.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    /// Time a new connection has to present the shared secret.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_port() -> u16 {
    4100
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_recent_window() -> usize {
    100
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    /// The config written on first start. The authentication key is freshly
    /// generated every time.
    fn default() -> Self {
        Self {
            repo: String::new(),
            git_ref: "refs/heads/master".to_string(),
            poll_time_seconds: 20,
            web_socket_path: "/courier/ws".to_string(),
            authentication_key: courier_common::id::generate_auth_key(),
            data_folder: "courier/data/".to_string(),
            port: default_port(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            recent_window: default_recent_window(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Config {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Apply environment overrides (`PORT`).
    pub fn apply_env(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authentication_key.is_empty() {
            return Err(ConfigError::Invalid("authentication_key must not be empty"));
        }
        if !self.web_socket_path.starts_with('/') {
            return Err(ConfigError::Invalid("web_socket_path must start with '/'"));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("outbound_queue_capacity must be at least 1"));
        }
        if self.recent_window == 0 {
            return Err(ConfigError::Invalid("recent_window must be at least 1"));
        }
        Ok(())
    }
}

/// Load the config, or write a default one and report that it needs editing.
pub fn load_or_init(store: &dyn ConfigStore) -> Result<Config, ConfigError> {
    match store.load() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(ConfigError::NotFound(location)) => {
            store.save(&Config::default())?;
            Err(ConfigError::DefaultWritten(location))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn missing_config_writes_default() {
        let store = MemoryStore::new();
        let err = load_or_init(&store).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultWritten(_)));

        // The default is now there and usable.
        let config = load_or_init(&store).unwrap();
        assert_eq!(config.web_socket_path, "/courier/ws");
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.recent_window, 100);
        assert!(!config.authentication_key.is_empty());
    }

    #[test]
    fn default_keys_are_fresh() {
        assert_ne!(
            Config::default().authentication_key,
            Config::default().authentication_key
        );
    }

    #[test]
    fn gateway_fields_default_when_absent() {
        let json = r#"{
            "repo": "git@example.com:fleet/site.git",
            "ref": "refs/heads/main",
            "poll_time_seconds": 30,
            "web_socket_path": "/ws",
            "authentication_key": "secret",
            "data_folder": "data/"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.git_ref, "refs/heads/main");
        assert_eq!(config.port, 4100);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut config = Config::default();
        config.authentication_key.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.web_socket_path = "ws".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
