//! Layered application configuration, based on [config]: environment variables over an optional
//! file over struct defaults, covering the fields the server endpoint and proxy bridge actually
//! need (§10.3).
//!
//! # Layers
//!
//! ## Layer 1 (Environment variables) \[optional\]
//!
//! The environment variables are the top most layer. They can be used to overwrite any previous
//! configuration. Environment variables have the format `[ENV_PREFIX]_[field]_[sub_field]` where
//! `ENV_PREFIX` is an environment variable defaulting to `QUARRY`.
//!
//! ## Layer 2 (Custom configuration) \[optional\]
//!
//! The next layer is an optional configuration file. The file location can be configured using the
//! `CONFIG_FILE` environment variable, defaulting to `config/config`. It can be of any file type
//! supported by [config].
//!
//! ## Layer 3 (Default configuration)
//!
//! The default configuration provides default values for all config fields, defined directly on
//! the struct.

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// [`Config`] holds all configuration for the application. One immutable instance is created on
/// startup via [`Config::read`] and then shared among the server endpoint and proxy bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The network address the server endpoint binds to.
    pub address: String,

    /// Whether the server requires Mojang session-service authentication.
    pub online_mode: bool,

    /// The message of the day shown in the status response.
    pub motd: String,

    /// The maximum number of simultaneous players; beyond this, logins are kicked with
    /// "Server is full".
    pub max_players: u32,

    /// The advertised protocol version name shown in the status response (e.g. `"1.16.5"`).
    pub version_name: String,

    /// Path to a PNG file to base64-encode as the status response favicon; disabled if empty.
    pub icon_path: Option<String>,

    /// The compression threshold the server announces via `login_set_compression`; packets are
    /// never compressed if absent.
    pub compression_threshold: Option<i32>,

    /// Timeout, in seconds, for Mojang session-service HTTP calls.
    pub auth_timeout: u64,

    /// The idle-connection timeout, in seconds, before a connection is closed.
    pub idle_timeout: u64,

    /// The proxy bridge's configuration; absent disables the proxy entry point entirely.
    pub proxy: Option<Proxy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:25565".to_string(),
            online_mode: true,
            motd: "A Quarry Server".to_string(),
            max_players: 20,
            version_name: "1.16.5".to_string(),
            icon_path: None,
            compression_threshold: Some(256),
            auth_timeout: 30,
            idle_timeout: 30,
            proxy: None,
        }
    }
}

/// The proxy bridge's configuration (§4.8).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Proxy {
    /// A fixed upstream address; when absent, the virtual host claimed in the downstream
    /// handshake is used instead.
    pub upstream_address: Option<String>,

    /// Whether to opt into the zero-decode fast-forward bypass once both sides' compression
    /// thresholds agree.
    pub fast_forward: bool,
}

impl Config {
    /// Creates a new application configuration as described in the [module documentation](crate::config).
    pub fn read() -> Result<Self, ConfigError> {
        let env_prefix = env::var("ENV_PREFIX").unwrap_or_else(|_| "quarry".into());
        let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/config".into());

        let s = config::Config::builder()
            .add_source(File::with_name(&config_file).required(false))
            .add_source(Environment::with_prefix(&env_prefix).separator("_"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.address, "0.0.0.0:25565");
        assert!(config.online_mode);
        assert_eq!(config.max_players, 20);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn read_falls_back_to_defaults_without_env_or_file() {
        // SAFETY: no other test in this process depends on these variables being set.
        unsafe {
            env::remove_var("CONFIG_FILE");
            env::remove_var("ENV_PREFIX");
        }
        let config = Config::read().expect("config should build from defaults alone");
        assert_eq!(config.motd, "A Quarry Server");
    }
}
