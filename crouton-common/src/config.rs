//! Bootstrap configuration loading
//!
//! Bootstrap settings come from a TOML file located in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CROUTON_CONFIG` environment variable
//! 3. `<config_dir>/crouton/config.toml`
//! 4. Compiled defaults (fallback, with a warning)
//!
//! Individual values may then be overridden by command-line flags and
//! environment variables in each binary. Drain tuning lives in the
//! database `settings` table instead (see [`crate::db::settings`]).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CROUTON_CONFIG";

/// Environment variable carrying the request signing secret
pub const SECRET_ENV_VAR: &str = "CROUTON_SIGNING_SECRET";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TomlConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Address the ingest service binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port for the ingest service
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared HMAC secret for `X-Signature` verification
    #[serde(default)]
    pub signing_secret: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub drain: DrainConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_address: default_bind_address(),
            port: default_port(),
            signing_secret: None,
            logging: LoggingConfig::default(),
            ingest: IngestConfig::default(),
            drain: DrainConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// How a batch containing invalid lines is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchPolicy {
    /// Any invalid line rejects the whole batch
    #[default]
    Strict,
    /// Invalid lines are rejected and reported individually
    Lenient,
}

/// Ingestion limits and policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Maximum size of a single NDJSON line in bytes
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub batch_policy: BatchPolicy,

    /// Total time a batch may spend retrying on SQLite lock contention
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            max_body_bytes: default_max_body_bytes(),
            batch_policy: BatchPolicy::default(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

/// Drain consumer bootstrap settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DrainConfig {
    /// Downstream endpoint receiving projected events
    #[serde(default)]
    pub projector_url: Option<String>,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("crouton").join("crouton.db"))
        .unwrap_or_else(|| PathBuf::from("./crouton_data/crouton.db"))
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read config {} failed: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load configuration
    ///
    /// An explicitly named file (CLI or environment) must exist and parse.
    /// A missing default-location file is not an error: defaults are used
    /// and a warning is logged.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            info!("Loading config from command-line path {}", path.display());
            return Self::load_from(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                info!("Loading config from {}={}", CONFIG_ENV_VAR, path);
                return Self::load_from(Path::new(&path));
            }
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::load_from(&path)
            }
            _ => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Signing secret with the environment override applied
    ///
    /// Returns an error when no non-empty secret is configured; the
    /// ingest service refuses to start without one.
    pub fn resolve_signing_secret(&self) -> Result<String> {
        if let Ok(secret) = std::env::var(SECRET_ENV_VAR) {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }

        match &self.signing_secret {
            Some(secret) if !secret.is_empty() => Ok(secret.clone()),
            _ => Err(Error::Config(format!(
                "Signing secret not configured. Set {} or `signing_secret` in config.toml",
                SECRET_ENV_VAR
            ))),
        }
    }
}

/// Platform config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("crouton").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.port, 5740);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ingest.max_line_bytes, 64 * 1024);
        assert_eq!(config.ingest.batch_policy, BatchPolicy::Strict);
        assert!(config.signing_secret.is_none());
        assert!(config.drain.projector_url.is_none());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = TomlConfig::from_toml_str(
            r#"
            database_path = "/var/lib/crouton/test.db"
            port = 8080
            signing_secret = "s3cret"

            [ingest]
            batch_policy = "lenient"
            max_line_bytes = 1024

            [drain]
            projector_url = "http://localhost:9000/events"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/crouton/test.db"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.signing_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.ingest.batch_policy, BatchPolicy::Lenient);
        assert_eq!(config.ingest.max_line_bytes, 1024);
        assert_eq!(config.ingest.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(
            config.drain.projector_url.as_deref(),
            Some("http://localhost:9000/events")
        );
    }

    #[test]
    fn test_unknown_batch_policy_rejected() {
        let result = TomlConfig::from_toml_str("[ingest]\nbatch_policy = \"sometimes\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
