//! Configuration types and defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokfence_core::ProviderName;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::paths;

/// Default TCP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 9471;

/// Top-level configuration.
///
/// Unknown top-level keys in the TOML file are ignored; every recognized
/// key has a default so an absent file yields a usable config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daemon listener settings.
    #[serde(default)]
    pub daemon: DaemonSection,
    /// Log store settings.
    #[serde(default)]
    pub logging: LoggingSection,
    /// Configured providers, keyed by name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSection>,
}

/// `[daemon]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    /// Loopback host for the TCP listener.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unix-domain-socket path. `~` expands to the home directory.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    /// Whether the capability/risk/sensor layer is active.
    #[serde(default = "default_true")]
    pub immune_enabled: bool,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            socket_path: default_socket_path(),
            immune_enabled: true,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Path of the SQLite store. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Request records older than this many days are pruned; 0 disables.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

/// One `[providers.<name>]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSection {
    /// Absolute upstream base URL, scheme http or https, no trailing slash.
    pub upstream: String,
    /// Headers injected verbatim on every upstream call.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_socket_path() -> String {
    "~/.tokfence/tokfence.sock".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "~/.tokfence/tokfence.db".to_owned()
}

fn default_retention_days() -> u32 {
    30
}

impl Config {
    /// Validate the configuration, normalizing provider upstreams.
    ///
    /// Trailing slashes on upstream URLs are trimmed rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] on the first invalid field.
    pub fn validate(&mut self) -> ConfigResult<()> {
        if self.daemon.port == 0 {
            return Err(ConfigError::ValidationError {
                field: "daemon.port".to_owned(),
                message: "port must be non-zero".to_owned(),
            });
        }
        if self.daemon.host.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "daemon.host".to_owned(),
                message: "host must not be empty".to_owned(),
            });
        }
        for (name, section) in &mut self.providers {
            if !ProviderName::is_valid(name) {
                return Err(ConfigError::ValidationError {
                    field: format!("providers.{name}"),
                    message: "provider names are lowercase ASCII [a-z0-9_-]".to_owned(),
                });
            }
            let trimmed = section.upstream.trim_end_matches('/');
            let url = Url::parse(trimmed).map_err(|e| ConfigError::ValidationError {
                field: format!("providers.{name}.upstream"),
                message: e.to_string(),
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::ValidationError {
                    field: format!("providers.{name}.upstream"),
                    message: format!("unsupported scheme {:?}", url.scheme()),
                });
            }
            if url.host_str().is_none() {
                return Err(ConfigError::ValidationError {
                    field: format!("providers.{name}.upstream"),
                    message: "upstream must be an absolute URL".to_owned(),
                });
            }
            section.upstream = trimmed.to_owned();
        }
        Ok(())
    }

    /// Socket path with `~` expanded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHomeDir`] if expansion needs a home
    /// directory and none can be found.
    pub fn socket_path(&self) -> ConfigResult<PathBuf> {
        paths::expand_tilde(&self.daemon.socket_path)
    }

    /// Database path with `~` expanded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHomeDir`] if expansion needs a home
    /// directory and none can be found.
    pub fn db_path(&self) -> ConfigResult<PathBuf> {
        paths::expand_tilde(&self.logging.db_path)
    }

    /// `host:port` of the TCP listener.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.daemon.host, self.daemon.port)
    }

    /// Loopback base URL agents should use for a provider.
    #[must_use]
    pub fn provider_base_url(&self, provider: &str) -> String {
        format!("http://{}:{}/{provider}", self.daemon.host, self.daemon.port)
    }

    /// Look up a provider section.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderSection> {
        self.providers.get(name)
    }

    /// Insert or replace a provider entry.
    pub fn set_provider(&mut self, name: &str, upstream: &str) {
        let entry = self.providers.entry(name.to_owned()).or_default();
        entry.upstream = upstream.trim_end_matches('/').to_owned();
    }
}
