//! Configuration for the sentinel tunnel
//!
//! The configuration maps logical services ("databases") to the local ports the
//! proxy listens on, and lists the Sentinel endpoints used to discover each
//! service's current master address.
//!
//! The on-disk format is JSON:
//!
//! ```json
//! {
//!   "Sentinels_addresses_list": ["10.0.0.1:26379", "10.0.0.2:26379"],
//!   "Databases": [
//!     { "Name": "cache", "Local_port": "7000" }
//!   ]
//! }
//! ```
//!
//! Optional keys (`Listen_host`, `Sentinel_timeout_ms`, `Dial_timeout_ms`,
//! `Listener_failure`) all have defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Interface every listener binds when `Listen_host` is not set
///
/// The IPv6 wildcard, which also accepts IPv4 clients on dual-stack hosts.
/// Use `0.0.0.0` on hosts without IPv6.
pub const DEFAULT_LISTEN_HOST: &str = "::";

/// Per-sentinel connect/reply timeout when `Sentinel_timeout_ms` is not set
pub const DEFAULT_SENTINEL_TIMEOUT_MS: u64 = 5000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What happens to the process when one listener stops accepting connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerFailurePolicy {
    /// Terminate the whole process (it is expected to be restarted externally)
    #[default]
    Exit,
    /// Stop only the failed listener and keep serving the other services
    Isolate,
}

impl fmt::Display for ListenerFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerFailurePolicy::Exit => write!(f, "exit"),
            ListenerFailurePolicy::Isolate => write!(f, "isolate"),
        }
    }
}

/// A local port as written in the config file, either `"7000"` or `7000`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    /// Parse into a port number
    pub fn as_port(&self) -> Result<u16, ConfigError> {
        match self {
            PortValue::Number(port) => Ok(*port),
            PortValue::Text(text) => text
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::Invalid(format!("Invalid local port '{}': {}", text, e))),
        }
    }
}

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortValue::Number(port) => write!(f, "{}", port),
            PortValue::Text(text) => write!(f, "{}", text),
        }
    }
}

/// One logical service entry as it appears in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRoute {
    /// Logical service name, as known to Sentinel
    #[serde(rename = "Name")]
    pub name: String,

    /// Local port the proxy listens on for this service
    #[serde(rename = "Local_port")]
    pub local_port: PortValue,
}

impl DatabaseRoute {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            local_port: PortValue::Number(port),
        }
    }

    pub fn port(&self) -> Result<u16, ConfigError> {
        self.local_port.as_port()
    }
}

/// Validated forwarding rule: logical service name and its local port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalServiceRoute {
    pub name: String,
    pub port: u16,
}

/// Tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Sentinel endpoints (`host:port`), tried in order
    #[serde(rename = "Sentinels_addresses_list")]
    pub sentinels_addresses_list: Vec<String>,

    /// Logical services to expose
    #[serde(rename = "Databases")]
    pub databases: Vec<DatabaseRoute>,

    /// Local interface all listeners bind
    #[serde(rename = "Listen_host", default = "default_listen_host")]
    pub listen_host: String,

    /// Per-sentinel connect and reply timeout in milliseconds
    #[serde(
        rename = "Sentinel_timeout_ms",
        default = "default_sentinel_timeout_ms"
    )]
    pub sentinel_timeout_ms: u64,

    /// Optional bound on the backend dial in milliseconds
    #[serde(
        rename = "Dial_timeout_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dial_timeout_ms: Option<u64>,

    /// Listener failure policy
    #[serde(rename = "Listener_failure", default)]
    pub listener_failure: ListenerFailurePolicy,
}

fn default_listen_host() -> String {
    DEFAULT_LISTEN_HOST.to_string()
}

fn default_sentinel_timeout_ms() -> u64 {
    DEFAULT_SENTINEL_TIMEOUT_MS
}

impl TunnelConfig {
    /// Create a configuration with default optional settings
    pub fn new(sentinels: Vec<String>, databases: Vec<DatabaseRoute>) -> Self {
        Self {
            sentinels_addresses_list: sentinels,
            databases,
            listen_host: default_listen_host(),
            sentinel_timeout_ms: DEFAULT_SENTINEL_TIMEOUT_MS,
            dial_timeout_ms: None,
            listener_failure: ListenerFailurePolicy::default(),
        }
    }

    /// Read, parse and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        debug!("Loaded {} bytes of config from {}", contents.len(), path.display());

        Self::from_json_str(&contents)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TunnelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sentinels_addresses_list.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one sentinel address must be configured".to_string(),
            ));
        }

        for address in &self.sentinels_addresses_list {
            validate_address(address, "sentinel")?;
        }

        if self.databases.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one database must be configured".to_string(),
            ));
        }

        self.listen_host.parse::<IpAddr>().map_err(|e| {
            ConfigError::Invalid(format!("Invalid listen host '{}': {}", self.listen_host, e))
        })?;

        let mut names = HashSet::new();
        let mut ports = HashSet::new();

        for database in &self.databases {
            if database.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "Database name cannot be empty".to_string(),
                ));
            }

            if !names.insert(database.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate database name '{}'",
                    database.name
                )));
            }

            // Port 0 asks the OS for a free port, so it can repeat
            let port = database.port()?;
            if port != 0 && !ports.insert(port) {
                return Err(ConfigError::Invalid(format!(
                    "Local port {} is used by more than one database",
                    port
                )));
            }
        }

        Ok(())
    }

    /// Typed view of the forwarding rules, in config order
    pub fn routes(&self) -> Result<Vec<LogicalServiceRoute>, ConfigError> {
        self.databases
            .iter()
            .map(|database| {
                Ok(LogicalServiceRoute {
                    name: database.name.clone(),
                    port: database.port()?,
                })
            })
            .collect()
    }

    /// Socket address a listener for `port` binds
    pub fn listen_addr(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        let ip = self.listen_host.parse::<IpAddr>().map_err(|e| {
            ConfigError::Invalid(format!("Invalid listen host '{}': {}", self.listen_host, e))
        })?;
        Ok(SocketAddr::new(ip, port))
    }

    pub fn sentinel_timeout(&self) -> Duration {
        Duration::from_millis(self.sentinel_timeout_ms)
    }

    pub fn dial_timeout(&self) -> Option<Duration> {
        self.dial_timeout_ms.map(Duration::from_millis)
    }
}

/// Validate address format (should be host:port)
pub fn validate_address(addr: &str, addr_type: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Invalid(format!(
            "Invalid {} address format: '{}' (expected format: host:port)",
            addr_type, addr
        )));
    }

    // parts[1] is the host because rsplitn reverses
    if parts[1].is_empty() {
        return Err(ConfigError::Invalid(format!(
            "Invalid {} address format: '{}' (host cannot be empty)",
            addr_type, addr
        )));
    }

    parts[0].parse::<u16>().map_err(|e| {
        ConfigError::Invalid(format!(
            "Invalid port in {} address '{}': {}",
            addr_type, addr, e
        ))
    })?;

    Ok(())
}
