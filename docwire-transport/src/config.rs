//! Transport configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via DOCWIRE_CONFIG)
//! 3. Environment variables

use docwire_protocol::{ServerAddress, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Socket options applied to every connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    /// Connect timeout in milliseconds (0 = no timeout).
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds (0 = no timeout).
    pub read_timeout_ms: u64,
    /// Enable SO_KEEPALIVE.
    pub keep_alive: bool,
    /// SO_RCVBUF size, applied only when positive.
    pub receive_buffer_size: u32,
    /// SO_SNDBUF size, applied only when positive.
    pub send_buffer_size: u32,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 0,
            keep_alive: true,
            receive_buffer_size: 0,
            send_buffer_size: 0,
        }
    }
}

impl SocketSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_receive_buffer_size(mut self, size: u32) -> Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn with_send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = size;
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(ms) = std::env::var("DOCWIRE_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.connect_timeout_ms = ms;
            }
        }
        if let Ok(ms) = std::env::var("DOCWIRE_READ_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.read_timeout_ms = ms;
            }
        }
        if let Ok(enabled) = std::env::var("DOCWIRE_KEEP_ALIVE") {
            self.keep_alive = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(size) = std::env::var("DOCWIRE_RECV_BUFFER") {
            if let Ok(size) = size.parse() {
                self.receive_buffer_size = size;
            }
        }
        if let Ok(size) = std::env::var("DOCWIRE_SEND_BUFFER") {
            if let Ok(size) = size.parse() {
                self.send_buffer_size = size;
            }
        }
    }
}

/// TLS settings for client connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslSettings {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the bundled web PKI roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the address host).
    pub server_name: Option<String>,
}

impl SslSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("DOCWIRE_TLS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("DOCWIRE_TLS_CA") {
            self.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("DOCWIRE_TLS_CERT") {
            self.client_cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("DOCWIRE_TLS_KEY") {
            self.client_key_path = Some(PathBuf::from(path));
        }
        if let Ok(name) = std::env::var("DOCWIRE_TLS_SERVER_NAME") {
            self.server_name = Some(name);
        }
    }

    /// Validates TLS settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::ValidationError(
                "client_cert_path and client_key_path must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Server host name or IP.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Socket options.
    pub socket: SocketSettings,
    /// TLS options.
    pub ssl: SslSettings,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            socket: SocketSettings::default(),
            ssl: SslSettings::default(),
        }
    }
}

impl TransportConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DOCWIRE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: TransportConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DOCWIRE_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("DOCWIRE_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        self.socket.apply_env_overrides();
        self.ssl.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationError("host is empty".to_string()));
        }
        self.ssl.validate()
    }

    /// Returns the configured server address.
    pub fn address(&self) -> ServerAddress {
        ServerAddress::new(self.host.clone(), self.port)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
