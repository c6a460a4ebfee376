//! Engine configuration.
//!
//! Loaded from TOML. Every field has a default so a partial file (or no file
//! at all) yields a usable configuration.
//!
//! ```toml
//! [connection]
//! send_timeout_ms = 30000
//! receive_timeout_ms = 30000
//! send_buffer_size = 65536
//! receive_buffer_size = 65536
//!
//! [database]
//! host = "127.0.0.1"
//! port = 5984
//! name = "documents"
//!
//! [jobs]
//! timeout_ms = 600000
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default chunk size for body transfer (64KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default send/receive inactivity window
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 30_000;

/// Default whole-job deadline (10 minutes)
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Default document database port
pub const DEFAULT_DATABASE_PORT: u16 = 5984;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub database: DatabaseConfig,
    pub jobs: JobConfig,
}

/// Per-connection I/O settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum time a single write may make no progress
    pub send_timeout_ms: u64,
    /// Maximum time a single read may make no progress
    pub receive_timeout_ms: u64,
    /// Chunk size for outgoing bodies
    pub send_buffer_size: usize,
    /// Read buffer size for responses
    pub receive_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            receive_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            receive_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn with_timeouts(mut self, send: Duration, receive: Duration) -> Self {
        self.send_timeout_ms = send.as_millis() as u64;
        self.receive_timeout_ms = receive.as_millis() as u64;
        self
    }

    pub fn with_buffer_sizes(mut self, send: usize, receive: usize) -> Self {
        self.send_buffer_size = send;
        self.receive_buffer_size = receive;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    /// Database holding resource documents
    pub name: String,
    /// Database holding user documents
    pub users_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_DATABASE_PORT,
            name: "documents".to_string(),
            users_name: "users".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub timeout_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
        }
    }
}

impl JobConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EngineConfig {
    /// Default config file location (~/.config/dms/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dms").join("config.toml"))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        if conn.send_buffer_size == 0 || conn.receive_buffer_size == 0 {
            return Err(Error::Config("Buffer sizes must be positive".to_string()));
        }
        if conn.send_timeout_ms == 0 || conn.receive_timeout_ms == 0 {
            return Err(Error::Config("I/O timeouts must be positive".to_string()));
        }
        if self.database.name.is_empty() {
            return Err(Error::Config("Database name must not be empty".to_string()));
        }
        if self.database.host.is_empty() {
            return Err(Error::Config("Database host must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.connection.send_buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.database.port, DEFAULT_DATABASE_PORT);
        assert_eq!(config.jobs.timeout(), Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [connection]
            receive_timeout_ms = 1500

            [database]
            name = "archive"
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.receive_timeout(), Duration::from_millis(1500));
        assert_eq!(config.connection.send_timeout_ms, DEFAULT_IO_TIMEOUT_MS);
        assert_eq!(config.database.name, "archive");
        assert_eq!(config.database.host, "127.0.0.1");
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let result = EngineConfig::from_toml_str(
            r#"
            [connection]
            send_buffer_size = 0
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = EngineConfig::from_toml_str("[connection\nsend_timeout_ms = 1");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[jobs]\ntimeout_ms = 2000\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.jobs.timeout(), Duration::from_secs(2));

        let missing = temp.path().join("missing.toml");
        let fallback = EngineConfig::load_or_default(Some(&missing)).unwrap();
        assert_eq!(fallback, EngineConfig::default());
    }
}
