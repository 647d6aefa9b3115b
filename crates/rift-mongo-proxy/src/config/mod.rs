//! Configuration types for the Rift MongoDB proxy.

mod connection_string;
mod resolve;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

pub use connection_string::{ConnectionString, DEFAULT_PORT};
pub use resolve::ResolveConfig;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:28017";
pub const DEFAULT_TARGET_ADDR: &str = "127.0.0.1:27017";

/// Configuration and connection-string errors. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid connection string '{0}': expected mongodb:// or mongodb+srv://")]
    InvalidScheme(String),
    #[error("Connection string '{0}' has no hosts")]
    MissingHosts(String),
    #[error("Invalid host '{0}' in connection string")]
    InvalidHost(String),
    #[error("Invalid port in host '{0}'")]
    InvalidPort(String),
    #[error("Invalid connection string option '{0}'")]
    InvalidOption(String),
    #[error("mongodb+srv connection strings take exactly one host and no port, got '{0}'")]
    InvalidSrvHost(String),
    #[error("Invalid listen address '{0}': {1}")]
    InvalidListenAddr(String, std::net::AddrParseError),
    #[error("resolve.attempts must be at least 1")]
    NoResolveAttempts,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Address the proxy accepts client connections on
    pub listen_addr: String,
    /// Plain `host:port` of the target, used when no URI is given
    pub target_addr: String,
    /// Full target connection string; takes precedence over `target_addr`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_uri: Option<String>,
    /// CA bundle (PEM); forces TLS upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    /// Client certificate and key (single PEM); forces TLS upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    /// Optional Prometheus endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_addr: Option<SocketAddr>,
    pub resolve: ResolveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            target_addr: DEFAULT_TARGET_ADDR.to_string(),
            target_uri: None,
            ca_file: None,
            key_file: None,
            metrics_addr: None,
            resolve: ResolveConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn with_target_addr(mut self, addr: impl Into<String>) -> Self {
        self.target_addr = addr.into();
        self
    }

    pub fn with_target_uri(mut self, uri: impl Into<String>) -> Self {
        self.target_uri = Some(uri.into());
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<String>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn with_key_file(mut self, path: impl Into<String>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    pub fn with_metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    pub fn with_resolve(mut self, resolve: ResolveConfig) -> Self {
        self.resolve = resolve;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_socket_addr()?;
        if self.resolve.attempts == 0 {
            return Err(ConfigError::NoResolveAttempts);
        }
        self.target_connection_string()?;
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|e| ConfigError::InvalidListenAddr(self.listen_addr.clone(), e))
    }

    /// Effective target descriptor.
    ///
    /// The URI wins over the plain address. CA and key files force TLS on
    /// regardless of what the URI says; a CA file also pins the connection
    /// to the named host (`directConnection`).
    pub fn target_connection_string(&self) -> Result<ConnectionString, ConfigError> {
        let uri = match self.target_uri {
            Some(ref uri) => uri.clone(),
            None => format!("mongodb://{}", self.target_addr),
        };
        let mut cs = ConnectionString::parse(&uri)?;
        cs.set_database(None);

        if let Some(ref ca_file) = self.ca_file {
            cs.set_option("tls", "true");
            cs.set_option("tlsCAFile", ca_file);
            cs.set_option("directConnection", "true");
        }
        if let Some(ref key_file) = self.key_file {
            cs.set_option("tls", "true");
            cs.set_option("tlsCertificateKeyFile", key_file);
        }
        Ok(cs)
    }
}
