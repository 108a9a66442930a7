//! TOML-based configuration persistence for the server endpoint.
//!
//! Reads and writes [`NodeConfig`] at the platform-appropriate location:
//! - Windows:  `%APPDATA%\Peerwire\config.toml`
//! - Linux:    `~/.config/peerwire/config.toml`
//! - macOS:    `~/Library/Application Support/Peerwire/config.toml`
//!
//! Every field carries a serde default, so a missing file, an empty file,
//! and a file written by an older version all load cleanly:
//!
//! ```toml
//! [node]
//! name = "peerwire"
//! log_level = "info"
//!
//! [listen]
//! transport = "tcp"
//! host = "127.0.0.1"
//! port = 52700
//! backlog = 128
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::listen::ListenSpec;

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The `[listen]` section does not describe a bindable listener.
    #[error("invalid [listen] configuration: {0}")]
    InvalidListen(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level endpoint configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub listen: ListenSection,
}

/// Identity and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Name this endpoint is known by to the orchestrator and in log output.
    #[serde(default = "default_node_name")]
    pub name: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the endpoint listens for inbound peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenSection {
    /// `"tcp"` or `"unix"`.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Bind address for the TCP transport.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port for the TCP transport.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Socket path for the Unix transport.
    #[serde(default)]
    pub path: String,
    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl ListenSection {
    /// Validates this section and converts it into a [`ListenSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidListen`] for an unknown transport, an
    /// unparsable host, or a unix transport without a path.
    pub fn to_spec(&self) -> Result<ListenSpec, ConfigError> {
        match self.transport.as_str() {
            "tcp" => {
                let host: IpAddr = self.host.parse().map_err(|_| {
                    ConfigError::InvalidListen(format!("host {:?} is not an IP address", self.host))
                })?;
                Ok(ListenSpec::tcp_on(host, self.port, self.backlog))
            }
            #[cfg(unix)]
            "unix" => {
                if self.path.is_empty() {
                    return Err(ConfigError::InvalidListen(
                        "unix transport requires a non-empty path".to_string(),
                    ));
                }
                Ok(ListenSpec::unix(&self.path))
            }
            other => Err(ConfigError::InvalidListen(format!(
                "unknown transport {other:?}"
            ))),
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_node_name() -> String {
    "peerwire".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_transport() -> String {
    "tcp".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    52700
}
fn default_backlog() -> u32 {
    128
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            host: default_host(),
            port: default_port(),
            path: String::new(),
            backlog: default_backlog(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads [`NodeConfig`] from disk, returning `NodeConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<NodeConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: NodeConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the config directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &NodeConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Peerwire"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("peerwire"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Peerwire")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
