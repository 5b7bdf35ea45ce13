//! # Configuration Module
//!
//! Loads the substrate's configuration from a layered source stack
//! (compiled-in defaults, then an optional file, then environment
//! variables prefixed `WORKER_` with `__` as the nested separator) and
//! validates it before the worker process starts serving traffic.

use serde::{Deserialize, Serialize};

/// Top-level configuration for one worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub worker: WorkerIdentityConfig,
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub rate_limit: RateLimitDefaultsConfig,
}

impl Config {
    /// Load configuration from environment variables and an optional file,
    /// layered over compiled-in defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(
                config::Config::try_from(&Config::default())
                    .map_err(|e| ConfigError::LoadError(e.to_string()))?,
            )
            .add_source(config::File::with_name("config/worker").required(false))
            .add_source(config::File::with_name("config/worker.local").required(false))
            .add_source(
                config::Environment::with_prefix("WORKER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate the configuration. Unlike a placeholder, this performs the
    /// checks the worker bootstrap actually depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if crate::types::WorkerType::parse(&self.worker.worker_type).is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "WORKER_TYPE '{}' is not one of the known worker types",
                self.worker.worker_type
            )));
        }
        if self.worker.concurrency < 1 {
            return Err(ConfigError::ValidationError(
                "CONCURRENCY must be >= 1".to_string(),
            ));
        }
        if self.broker.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "KAFKA_BOOTSTRAP_SERVERS".to_string(),
            ));
        }
        if self.storage.database_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("DATABASE_URL".to_string()));
        }
        if self.storage.pool_size < 1 {
            return Err(ConfigError::ValidationError(
                "storage pool_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `GROUP_ID` defaults to the worker type when unset.
    pub fn effective_group_id(&self) -> String {
        if self.worker.group_id.trim().is_empty() {
            self.worker.worker_type.clone()
        } else {
            self.worker.group_id.clone()
        }
    }

    pub fn health_port(&self) -> u16 {
        if let Some(port) = self.server.health_port_override {
            return port;
        }
        crate::types::WorkerType::parse(&self.worker.worker_type)
            .map(|wt| wt.default_health_port())
            .unwrap_or(9000)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerIdentityConfig::default(),
            broker: BrokerConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            rate_limit: RateLimitDefaultsConfig::default(),
        }
    }
}

/// Identity and behavior flags for this worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentityConfig {
    pub worker_type: String,
    pub concurrency: u32,
    pub group_id: String,
    pub allow_future_schema: bool,
    pub metrics_include_tenant_id: bool,
    pub rate_limit_enabled: bool,
}

impl Default for WorkerIdentityConfig {
    fn default() -> Self {
        Self {
            worker_type: String::new(),
            concurrency: 1,
            group_id: String::new(),
            allow_future_schema: false,
            metrics_include_tenant_id: false,
            rate_limit_enabled: false,
        }
    }
}

/// Kafka connection, security, producer, and consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub bootstrap_servers: String,
    pub security_protocol: String,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub ssl_cafile: Option<String>,
    pub ssl_certfile: Option<String>,
    pub ssl_keyfile: Option<String>,
    pub ssl_keyfile_password: Option<String>,
    pub ssl_crlfile: Option<String>,
    pub ssl_ciphers: Option<String>,
    pub ssl_check_hostname: bool,
    pub producer_retries: u32,
    pub producer_retry_backoff_ms: u64,
    pub consumer_auto_offset_reset: String,
    pub consumer_max_poll_records: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:29092".to_string(),
            security_protocol: "PLAINTEXT".to_string(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_cafile: None,
            ssl_certfile: None,
            ssl_keyfile: None,
            ssl_keyfile_password: None,
            ssl_crlfile: None,
            ssl_ciphers: None,
            ssl_check_hostname: true,
            producer_retries: 3,
            producer_retry_backoff_ms: 100,
            consumer_auto_offset_reset: "earliest".to_string(),
            consumer_max_poll_records: 500,
        }
    }
}

/// Event-store database connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub pool_size: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/exceptions".to_string(),
            pool_size: 10,
            connect_timeout_seconds: 10,
        }
    }
}

/// Health-server bind settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub health_port_override: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            health_port_override: None,
        }
    }
}

/// Process-wide rate-limit defaults applied to tenants without an explicit
/// override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitDefaultsConfig {
    pub events_per_second: f64,
    pub events_per_minute: f64,
    pub burst_size: u32,
}

impl Default for RateLimitDefaultsConfig {
    fn default() -> Self {
        Self {
            events_per_second: 10.0,
            events_per_minute: 600.0,
            burst_size: 20,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadError(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    #[error("missing required configuration: {0}")]
    MissingRequired(String),

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_fails_validation_without_worker_type() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_config_passes_validation() {
        let mut config = Config::default();
        config.worker.worker_type = "intake".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_worker_type_rejected() {
        let mut config = Config::default();
        config.worker.worker_type = "bogus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.worker.worker_type = "triage".to_string();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_group_id_defaults_to_worker_type() {
        let mut config = Config::default();
        config.worker.worker_type = "policy".to_string();
        assert_eq!(config.effective_group_id(), "policy");
    }

    #[test]
    fn test_explicit_group_id_respected() {
        let mut config = Config::default();
        config.worker.worker_type = "policy".to_string();
        config.worker.group_id = "custom-group".to_string();
        assert_eq!(config.effective_group_id(), "custom-group");
    }

    #[test]
    fn test_health_port_derived_from_worker_type() {
        let mut config = Config::default();
        config.worker.worker_type = "tool".to_string();
        assert_eq!(config.health_port(), 9005);
    }

    #[test]
    fn test_health_port_override_wins() {
        let mut config = Config::default();
        config.worker.worker_type = "tool".to_string();
        config.server.health_port_override = Some(19999);
        assert_eq!(config.health_port(), 19999);
    }

    #[test]
    fn test_broker_config_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.bootstrap_servers, "localhost:29092");
        assert_eq!(config.security_protocol, "PLAINTEXT");
        assert!(config.ssl_check_hostname);
        assert_eq!(config.producer_retries, 3);
        assert_eq!(config.producer_retry_backoff_ms, 100);
    }
}
