//! Server configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use weighin_core::RetryConfig;
use weighin_core::fitbit::{DEFAULT_API_BASE, DEFAULT_TOKEN_URL};
use weighin_types::TimezonePolicy;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Fitbit API credentials and settings.
    pub fitbit: FitbitSettings,
    /// Secret store settings.
    pub secrets: SecretsConfig,
    /// Backfill settings.
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every error.
    ///
    /// ```
    /// use weighin_service::Config;
    ///
    /// let config = Config::default();
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.fitbit.validate());
        errors.extend(self.secrets.validate());
        errors.extend(self.sync.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new("server.bind", "bind address cannot be empty"));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Ok(_) => {
                    if self.bind.parse::<SocketAddr>().is_err() {
                        errors.push(ValidationError::new(
                            "server.bind",
                            format!(
                                "invalid bind address '{}': host must be an IP address",
                                self.bind
                            ),
                        ));
                    }
                }
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: weighin_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }
}

/// Fitbit API settings.
///
/// Only `client_id` and `client_secret` are needed to talk to the API. The
/// webhook verification code is compared against `GET /receive?verify=`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitbitSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Subscriber verification code issued by Fitbit.
    pub verification_code: String,
    /// API host.
    pub api_base: String,
    /// OAuth token endpoint.
    pub token_url: String,
    /// Fixed UTC offset of the account's wall clock, e.g. `+10:00`.
    pub utc_offset: String,
}

impl Default for FitbitSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            verification_code: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            utc_offset: "+00:00".to_string(),
        }
    }
}

impl std::fmt::Debug for FitbitSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitbitSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("verification_code", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .field("utc_offset", &self.utc_offset)
            .finish()
    }
}

impl FitbitSettings {
    /// Whether API credentials are configured.
    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// The timezone used to resolve weight timestamps.
    pub fn timezone(&self) -> Result<TimezonePolicy, weighin_types::ParseError> {
        TimezonePolicy::parse(&self.utc_offset)
    }

    /// Client settings for [`weighin_core::FitbitClient`].
    pub fn client_config(&self, retries: u32) -> weighin_core::FitbitConfig {
        weighin_core::FitbitConfig::new(&self.client_id, &self.client_secret)
            .api_base(&self.api_base)
            .token_url(&self.token_url)
            .retry(RetryConfig::new(retries))
    }

    /// Validate Fitbit settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, url) in [
            ("fitbit.api_base", &self.api_base),
            ("fitbit.token_url", &self.token_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(ValidationError::new(
                    field,
                    format!("URL must start with http:// or https://, got '{}'", url),
                ));
            }
        }

        if let Err(e) = self.timezone() {
            errors.push(ValidationError::new("fitbit.utc_offset", e.to_string()));
        }

        if self.client_id.is_empty() != self.client_secret.is_empty() {
            errors.push(ValidationError::new(
                "fitbit.client_secret",
                "client_id and client_secret must be set together",
            ));
        }

        errors
    }
}

/// Secret store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Name under which the OAuth token is versioned.
    pub token_name: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            token_name: "fitbit-token".to_string(),
        }
    }
}

impl SecretsConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.token_name.trim().is_empty() {
            errors.push(ValidationError::new(
                "secrets.token_name",
                "token name cannot be empty",
            ));
        }
        errors
    }
}

/// Maximum number of months fetched at once.
pub const MAX_CONCURRENT_RANGES: usize = 12;
/// Maximum retries for one provider request.
pub const MAX_RETRIES: u32 = 10;

/// Backfill settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Months reconciled concurrently during a backfill.
    pub max_concurrent_ranges: usize,
    /// Retries for transient provider failures.
    pub retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_ranges: weighin_core::sync::DEFAULT_MAX_CONCURRENT,
            retries: 3,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.max_concurrent_ranges == 0 || self.max_concurrent_ranges > MAX_CONCURRENT_RANGES {
            errors.push(ValidationError::new(
                "sync.max_concurrent_ranges",
                format!(
                    "{} is out of range (1-{})",
                    self.max_concurrent_ranges, MAX_CONCURRENT_RANGES
                ),
            ));
        }
        if self.retries > MAX_RETRIES {
            errors.push(ValidationError::new(
                "sync.retries",
                format!("{} is too many (maximum {})", self.retries, MAX_RETRIES),
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `sync.retries`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default config file location.
///
/// - Linux: `~/.config/weighin/server.toml`
/// - macOS: `~/Library/Application Support/weighin/server.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("weighin")
        .join("server.toml")
}
