//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub orders: OrderConfig,
    pub sweeper: SweeperConfig,
    pub auth: AuthConfig,
    pub sms_activate: SmsActivateConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_secs: u64,
    pub run_migrations: bool,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
    /// TTL of the per-order status cache entry
    pub order_status_ttl_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Order lifecycle settings
#[derive(Debug, Clone)]
pub struct OrderConfig {
    /// Used when the provider does not return its own expiry
    pub default_ttl_secs: u64,
    pub provider_call_timeout_secs: u64,
    pub provider_max_attempts: u32,
    pub default_currency: String,
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub batch_size: u32,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Bearer token accepted on admin routes
    pub admin_api_key: Option<String>,
    /// Key the session layer signs identity headers with
    pub internal_auth_secret: String,
}

#[derive(Debug, Clone)]
pub struct SmsActivateConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

fn env_or<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            orders: OrderConfig::from_env()?,
            sweeper: SweeperConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            sms_activate: SmsActivateConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        self.orders.validate()?;
        self.sweeper.validate()?;
        self.auth.validate()?;
        self.sms_activate.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env_or("DB_MAX_CONNECTIONS", "20")?,
            min_connections: env_or("DB_MIN_CONNECTIONS", "2")?,
            connection_timeout_secs: env_or("DB_CONNECTION_TIMEOUT", "30")?,
            run_migrations: env_or("DB_RUN_MIGRATIONS", "true")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            max_connections: env_or("CACHE_MAX_CONNECTIONS", "10")?,
            order_status_ttl_secs: env_or("ORDER_STATUS_CACHE_TTL_SECS", "5")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.order_status_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ORDER_STATUS_CACHE_TTL_SECS".to_string(),
            ));
        }

        Ok(())
    }

    pub fn order_status_ttl(&self) -> Duration {
        Duration::from_secs(self.order_status_ttl_secs)
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl OrderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(OrderConfig {
            default_ttl_secs: env_or("ORDER_DEFAULT_TTL_SECS", "1200")?,
            provider_call_timeout_secs: env_or("PROVIDER_CALL_TIMEOUT_SECS", "15")?,
            provider_max_attempts: env_or("PROVIDER_MAX_ATTEMPTS", "2")?,
            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "NGN".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue("ORDER_DEFAULT_TTL_SECS".to_string()));
        }
        if self.provider_call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PROVIDER_CALL_TIMEOUT_SECS".to_string(),
            ));
        }
        if self.provider_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("PROVIDER_MAX_ATTEMPTS".to_string()));
        }
        if self.default_currency.len() != 3 {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_CURRENCY must be a 3-letter code".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_ttl_secs as i64)
    }

    pub fn provider_call_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_call_timeout_secs)
    }
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 1200,
            provider_call_timeout_secs: 15,
            provider_max_attempts: 2,
            default_currency: "NGN".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SweeperConfig {
            interval_secs: env_or("SWEEPER_INTERVAL_SECS", "60")?,
            batch_size: env_or("SWEEPER_BATCH_SIZE", "200")?,
            concurrency: env_or("SWEEPER_CONCURRENCY", "8")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::InvalidValue("SWEEPER_INTERVAL_SECS".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("SWEEPER_BATCH_SIZE".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue("SWEEPER_CONCURRENCY".to_string()));
        }
        Ok(())
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 200,
            concurrency: 8,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AuthConfig {
            admin_api_key: optional_env("ADMIN_API_KEY"),
            internal_auth_secret: env::var("INTERNAL_AUTH_SECRET")
                .map_err(|_| ConfigError::MissingVariable("INTERNAL_AUTH_SECRET".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.internal_auth_secret.len() < 16 {
            return Err(ConfigError::ValidationFailed(
                "INTERNAL_AUTH_SECRET must be at least 16 characters".to_string(),
            ));
        }
        if let Some(key) = &self.admin_api_key {
            if key.len() < 16 {
                return Err(ConfigError::ValidationFailed(
                    "ADMIN_API_KEY must be at least 16 characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl SmsActivateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SmsActivateConfig {
            api_key: optional_env("SMS_ACTIVATE_API_KEY"),
            base_url: env::var("SMS_ACTIVATE_BASE_URL")
                .unwrap_or_else(|_| "https://api.sms-activate.org/stubs/handler_api.php".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "SMS_ACTIVATE_BASE_URL must be a valid URL".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_order_defaults_are_valid() {
        let config = OrderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_ttl(), chrono::Duration::minutes(20));
        assert_eq!(config.provider_max_attempts, 2);
    }

    #[test]
    fn test_zero_sweeper_batch_is_rejected() {
        let config = SweeperConfig {
            batch_size: 0,
            ..SweeperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_auth_secret_is_rejected() {
        let config = AuthConfig {
            admin_api_key: None,
            internal_auth_secret: "short".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }
}
