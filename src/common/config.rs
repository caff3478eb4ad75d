//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug target launch settings
    #[serde(default)]
    pub target: TargetConfig,

    /// Proxy listener settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Settings for launching the debug target
#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    /// Runtime executable used to launch the script
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Extra arguments passed to the runtime before the script
    #[serde(default)]
    pub runtime_args: Vec<String>,

    /// Diagnostic port handed to the runtime's inspector flag
    #[serde(default = "default_inspect_port")]
    pub inspect_port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            runtime_args: Vec::new(),
            inspect_port: default_inspect_port(),
        }
    }
}

fn default_runtime() -> String {
    "node".to_string()
}

fn default_inspect_port() -> u16 {
    9229
}

/// Proxy listener configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Host the proxy listens on for clients
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Port the proxy listens on for clients
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Respawn the target and reconnect when the debug connection closes
    #[serde(default)]
    pub restart_on_close: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            restart_on_close: false,
        }
    }
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    9230
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// How long to wait for the endpoint line to appear in target output
    #[serde(default = "default_discovery")]
    pub discovery_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            discovery_secs: default_discovery(),
        }
    }
}

fn default_discovery() -> u64 {
    10
}

impl Config {
    /// Load configuration, preferring an explicit path over the default
    /// per-user location
    ///
    /// Returns default configuration if no file exists at the default
    /// location; an explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            return toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()));
        }

        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                return toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()));
            }
        }

        Ok(Self::default())
    }

    /// Resolve the configured runtime to an executable path
    ///
    /// A bare name is searched in PATH; anything with a path separator is
    /// taken as-is.
    pub fn runtime_path(&self) -> Result<PathBuf> {
        let runtime = &self.target.runtime;
        let candidate = PathBuf::from(runtime);
        if candidate.is_absolute() || candidate.components().count() > 1 {
            return Ok(candidate);
        }
        which::which(runtime).map_err(|_| Error::RuntimeNotFound(runtime.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.target.runtime, "node");
        assert_eq!(config.target.inspect_port, 9229);
        assert_eq!(config.proxy.listen_port, 9230);
        assert!(!config.proxy.restart_on_close);
        assert_eq!(config.timeouts.discovery_secs, 10);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let config: Config = toml::from_str(
            r#"
            [target]
            inspect_port = 9339

            [proxy]
            listen_port = 8080
            restart_on_close = true
            "#,
        )
        .unwrap();
        assert_eq!(config.target.runtime, "node");
        assert_eq!(config.target.inspect_port, 9339);
        assert_eq!(config.proxy.listen_host, "127.0.0.1");
        assert_eq!(config.proxy.listen_port, 8080);
        assert!(config.proxy.restart_on_close);
        assert_eq!(config.timeouts.discovery_secs, 10);
    }

    #[test]
    fn explicit_runtime_path_is_not_searched() {
        let mut config = Config::default();
        config.target.runtime = "/opt/node/bin/node".to_string();
        assert_eq!(
            config.runtime_path().unwrap(),
            PathBuf::from("/opt/node/bin/node")
        );
    }
}
