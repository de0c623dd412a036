//! Configuration module for sshkit
//!
//! Loads named host and tunnel profiles from a TOML file:
//!
//! ```toml
//! [defaults]
//! user = "deploy"
//! private_key = "~/.ssh/id_ed25519"
//! proxy = "socks5h://127.0.0.1:1080"
//! timeout = "10s"
//!
//! [hosts.web]
//! host = "10.0.0.5"
//! port = 2222
//! command_timeout = "5m"
//!
//! [tunnels.db]
//! local = "127.0.0.1:15432"
//! server = "bastion.example.com:22"
//! remote = "db.internal:5432"
//! host = "web"
//! ```
//!
//! The file is looked up at the explicit `--config` path, then
//! `$SSHKIT_CONFIG`, then `~/.config/sshkit/config.toml`. Environment
//! variables `SSHKIT_USER`, `SSHKIT_PRIVATE_KEY` and `SSHKIT_PROXY` override
//! the `[defaults]` section.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::connection::config::DEFAULT_PORT;
use crate::connection::{ClientConfig, Endpoint, TunnelSpec};
use crate::error::{Error, Result};

/// Private key used when no profile names one
pub const DEFAULT_PRIVATE_KEY: &str = "~/.ssh/id_ed25519";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings shared by every profile
    pub defaults: Profile,

    /// Named host profiles
    pub hosts: HashMap<String, Profile>,

    /// Named tunnels
    pub tunnels: HashMap<String, TunnelProfile>,
}

/// Connection settings. Every field is optional so a host profile only
/// states what differs from `[defaults]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// Key text, or a path starting with `~/` or `/`
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    pub proxy: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub command_timeout: Option<Duration>,
    pub chunk_size: Option<usize>,
    pub quiet: Option<bool>,
    pub tty: Option<bool>,
}

impl Profile {
    /// Fill every unset field from `base`.
    pub fn or(&self, base: &Profile) -> Profile {
        Profile {
            host: self.host.clone().or_else(|| base.host.clone()),
            port: self.port.or(base.port),
            user: self.user.clone().or_else(|| base.user.clone()),
            private_key: self.private_key.clone().or_else(|| base.private_key.clone()),
            passphrase: self.passphrase.clone().or_else(|| base.passphrase.clone()),
            proxy: self.proxy.clone().or_else(|| base.proxy.clone()),
            timeout: self.timeout.or(base.timeout),
            command_timeout: self.command_timeout.or(base.command_timeout),
            chunk_size: self.chunk_size.or(base.chunk_size),
            quiet: self.quiet.or(base.quiet),
            tty: self.tty.or(base.tty),
        }
    }

    /// Build a client configuration. `host` and `user` must be set.
    pub fn to_client_config(&self) -> Result<ClientConfig> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| Error::config("no host configured"))?;
        let user = self
            .user
            .clone()
            .ok_or_else(|| Error::config(format!("no user configured for {}", host)))?;
        let key = self
            .private_key
            .clone()
            .unwrap_or_else(|| DEFAULT_PRIVATE_KEY.to_string());

        let mut config = ClientConfig::new(host, self.port.unwrap_or(DEFAULT_PORT), user, key)
            .quiet(self.quiet.unwrap_or(false))
            .tty(self.tty.unwrap_or(false));
        config.passphrase = self.passphrase.clone();
        config.proxy = self.proxy.clone();
        config.timeout = self.timeout;
        config.command_timeout = self.command_timeout;
        if let Some(chunk_size) = self.chunk_size {
            config = config.chunk_size(chunk_size);
        }
        Ok(config)
    }
}

/// A named tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelProfile {
    pub local: Endpoint,
    pub server: Endpoint,
    pub remote: Endpoint,
    /// Host profile supplying user, key and proxy
    #[serde(default)]
    pub host: Option<String>,
}

impl Config {
    /// Load configuration from the first file found, then apply environment overrides.
    ///
    /// An explicit path must exist; the implicit locations are optional.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::get_config_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No configuration file found, using defaults");
                    Config::default()
                }
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Implicit configuration locations, in priority order
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var("SSHKIT_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("sshkit").join("config.toml"));
        }

        paths
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config = Self::parse(&content).map_err(|e| {
            Error::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), hosts = config.hosts.len(), tunnels = config.tunnels.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse TOML configuration text
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env_overrides(&mut self) {
        // SSHKIT_USER
        if let Ok(user) = std::env::var("SSHKIT_USER") {
            self.defaults.user = Some(user);
        }

        // SSHKIT_PRIVATE_KEY
        if let Ok(key) = std::env::var("SSHKIT_PRIVATE_KEY") {
            self.defaults.private_key = Some(key);
        }

        // SSHKIT_PROXY
        if let Ok(proxy) = std::env::var("SSHKIT_PROXY") {
            self.defaults.proxy = Some(proxy);
        }
    }

    /// Resolve a CLI target: a host profile name, or `[user@]host[:port]`.
    pub fn resolve_target(&self, target: &str) -> Result<ClientConfig> {
        if let Some(profile) = self.hosts.get(target) {
            let mut merged = profile.or(&self.defaults);
            if merged.host.is_none() {
                merged.host = Some(target.to_string());
            }
            return merged.to_client_config();
        }

        let (user, address) = match target.rsplit_once('@') {
            Some((user, address)) => (Some(user.to_string()), address),
            None => (None, target),
        };

        let (host, port) = match Endpoint::parse(address) {
            Ok(endpoint) => (endpoint.host, Some(endpoint.port)),
            Err(_) => (address.to_string(), None),
        };
        if host.is_empty() {
            return Err(Error::config(format!("invalid target '{}'", target)));
        }

        let adhoc = Profile {
            host: Some(host),
            port,
            user,
            ..Profile::default()
        };
        adhoc.or(&self.defaults).to_client_config()
    }

    /// Client configuration for a named tunnel.
    pub fn tunnel_config(&self, name: &str) -> Result<ClientConfig> {
        let tunnel = self
            .tunnels
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown tunnel '{}'", name)))?;

        let credentials = match &tunnel.host {
            Some(host) => self
                .hosts
                .get(host)
                .ok_or_else(|| Error::config(format!("tunnel '{}' names unknown host '{}'", name, host)))?
                .or(&self.defaults),
            None => self.defaults.clone(),
        };

        let profile = Profile {
            host: Some(tunnel.server.host.clone()),
            port: Some(tunnel.server.port),
            ..credentials
        };
        let spec = TunnelSpec::new(tunnel.local.clone(), tunnel.server.clone(), tunnel.remote.clone());
        Ok(profile.to_client_config()?.tunnel(spec))
    }
}
