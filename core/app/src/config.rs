//! Application configuration.
//!
//! Built once at start-up from an optional JSON file plus environment
//! overrides, validated, then handed to the service constructors. Nothing in
//! the core reads the environment on its own.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use strongroom_auth::AuthSettings;
use strongroom_common::{Error, Result};
use strongroom_crypto::KdfParams;
use strongroom_storage::StoreDeadline;

/// Environment variable overriding `security.token_secret`.
pub const ENV_TOKEN_SECRET: &str = "STRONGROOM_TOKEN_SECRET";
/// Environment variable overriding `database.path`.
pub const ENV_DB_PATH: &str = "STRONGROOM_DB_PATH";
/// Environment variable overriding `logging.level`.
pub const ENV_LOG_LEVEL: &str = "STRONGROOM_LOG_LEVEL";

const MIN_TOKEN_SECRET_LENGTH: usize = 32;

/// Errors raised while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("strongroom.db"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub token_secret: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_days: u64,
    pub kdf: KdfParams,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            access_token_ttl_secs: 24 * 60 * 60,
            refresh_token_ttl_days: 30,
            kdf: KdfParams::default(),
        }
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("token_secret", &"[REDACTED]")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("kdf", &self.kdf)
            .finish()
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    /// Per-call store deadline in milliseconds; `None` disables it.
    pub store_timeout_ms: Option<u64>,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            store_timeout_ms: Some(30_000),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> std::result::Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize configuration to pretty JSON.
    pub fn to_json(&self) -> std::result::Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Apply overrides from `lookup`, typically the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(ENV_TOKEN_SECRET) {
            self.security.token_secret = secret;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
    }

    /// Load from an optional file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Check values the services cannot run with.
    ///
    /// # Errors
    /// - `Validation` for a short token secret or a zero TTL or timeout
    pub fn validate(&self) -> Result<()> {
        if self.security.token_secret.len() < MIN_TOKEN_SECRET_LENGTH {
            return Err(Error::Validation(format!(
                "security.token_secret must be at least {} bytes (set {})",
                MIN_TOKEN_SECRET_LENGTH, ENV_TOKEN_SECRET
            )));
        }
        if self.security.access_token_ttl_secs == 0 {
            return Err(Error::Validation(
                "security.access_token_ttl_secs must be positive".to_string(),
            ));
        }
        if self.security.refresh_token_ttl_days == 0 {
            return Err(Error::Validation(
                "security.refresh_token_ttl_days must be positive".to_string(),
            ));
        }
        if self.store_timeout_ms == Some(0) {
            return Err(Error::Validation(
                "store_timeout_ms must be positive when set".to_string(),
            ));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(Error::Validation("database.path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Deadline applied to every store call.
    pub fn store_deadline(&self) -> StoreDeadline {
        match self.store_timeout_ms {
            Some(ms) => StoreDeadline::new(std::time::Duration::from_millis(ms)),
            None => StoreDeadline::none(),
        }
    }

    /// Settings for the auth service.
    pub fn auth_settings(&self) -> Result<AuthSettings> {
        let access_secs = i64::try_from(self.security.access_token_ttl_secs).map_err(|_| {
            Error::Validation("security.access_token_ttl_secs is too large".to_string())
        })?;
        let refresh_days = i64::try_from(self.security.refresh_token_ttl_days).map_err(|_| {
            Error::Validation("security.refresh_token_ttl_days is too large".to_string())
        })?;
        let access_token_ttl = Duration::try_seconds(access_secs).ok_or_else(|| {
            Error::Validation("security.access_token_ttl_secs is too large".to_string())
        })?;
        let refresh_token_ttl = Duration::try_days(refresh_days).ok_or_else(|| {
            Error::Validation("security.refresh_token_ttl_days is too large".to_string())
        })?;

        Ok(AuthSettings {
            token_secret: strongroom_common::SensitiveBytes::new(
                self.security.token_secret.as_bytes().to_vec(),
            ),
            access_token_ttl,
            refresh_token_ttl,
            store_deadline: self.store_deadline(),
        })
    }
}
