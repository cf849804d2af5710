use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub server: ServerConfig,
    pub tokens: TokenConfig,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Deployment environment label (development, staging, production)
    pub environment: String,
    pub instance_id: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long in-flight requests get to finish once shutdown starts
    pub shutdown_grace_seconds: u64,
    /// Upper bound on any single storage operation
    pub storage_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub activation_ttl_seconds: u64,
    pub authentication_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_seconds: 5,
            storage_timeout_ms: 3000,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            activation_ttl_seconds: 3 * 86400, // 3 days
            authentication_ttl_seconds: 86400, // 24 hours
            cleanup_interval_seconds: 60,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

impl TokenConfig {
    pub fn activation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.activation_ttl_seconds as i64)
    }

    pub fn authentication_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.authentication_ttl_seconds as i64)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let instance_id =
            std::env::var("INSTANCE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:4000".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let server_defaults = ServerConfig::default();
        let token_defaults = TokenConfig::default();

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
                environment,
                instance_id,
            },
            server: ServerConfig {
                shutdown_grace_seconds: env_or(
                    "SHUTDOWN_GRACE_SECONDS",
                    server_defaults.shutdown_grace_seconds,
                ),
                storage_timeout_ms: env_or("STORAGE_TIMEOUT_MS", server_defaults.storage_timeout_ms),
            },
            tokens: TokenConfig {
                activation_ttl_seconds: env_or(
                    "ACTIVATION_TOKEN_TTL_SECONDS",
                    token_defaults.activation_ttl_seconds,
                ),
                authentication_ttl_seconds: env_or(
                    "AUTHENTICATION_TOKEN_TTL_SECONDS",
                    token_defaults.authentication_ttl_seconds,
                ),
                cleanup_interval_seconds: env_or(
                    "TOKEN_CLEANUP_INTERVAL_SECONDS",
                    token_defaults.cleanup_interval_seconds,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.instance_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "INSTANCE_ID cannot be empty".to_string(),
            ));
        }

        let durations = [
            ("SHUTDOWN_GRACE_SECONDS", self.server.shutdown_grace_seconds),
            ("STORAGE_TIMEOUT_MS", self.server.storage_timeout_ms),
            ("ACTIVATION_TOKEN_TTL_SECONDS", self.tokens.activation_ttl_seconds),
            (
                "AUTHENTICATION_TOKEN_TTL_SECONDS",
                self.tokens.authentication_ttl_seconds,
            ),
            (
                "TOKEN_CLEANUP_INTERVAL_SECONDS",
                self.tokens.cleanup_interval_seconds,
            ),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_config;

    #[test]
    fn test_defaults_are_valid() {
        let config = test_config();
        config.validate().unwrap();
        assert_eq!(config.server.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.server.storage_timeout(), Duration::from_secs(3));
        assert_eq!(config.tokens.activation_ttl(), chrono::Duration::days(3));
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        let mut config = test_config();
        config.server.shutdown_grace_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.tokens.cleanup_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_instance_id_is_rejected() {
        let mut config = test_config();
        config.node.instance_id.clear();
        assert!(config.validate().is_err());
    }
}
