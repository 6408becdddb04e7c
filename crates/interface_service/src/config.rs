//! Service configuration
//!
//! Values come from defaults, then an optional `lcfs.toml`, then
//! environment variables prefixed `LCFS` with `__` between path segments,
//! e.g. `LCFS__DATABASE__URL` or `LCFS__SCHEDULER__AUTO_SUBMIT_AFTER_DAYS`.

use serde::{Deserialize, Serialize};
use validator::Validate;

use domain_compliance::{CalculatorSettings, ConsumerSettings, SchedulerSettings};
use infra_db::DatabaseConfig;

use crate::error::ServiceError;

pub type DatabaseSettings = DatabaseConfig;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Bearer token verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IdentitySettings {
    /// HMAC secret shared with the identity provider
    #[validate(length(min = 16, message = "jwt_secret must be at least 16 bytes"))]
    pub jwt_secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Lifetime of tokens this service issues for its own jobs
    #[validate(range(min = 60))]
    pub token_ttl_secs: u64,
    pub leeway_secs: u64,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-in-production".to_string(),
            issuer: None,
            audience: None,
            token_ttl_secs: 3600,
            leeway_secs: 30,
        }
    }
}

/// Process-local balance cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 60,
        }
    }
}

/// Top-level configuration of the `lcfs-service` process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub database: DatabaseSettings,
    pub scheduler: SchedulerSettings,
    pub consumer: ConsumerSettings,
    pub identity: IdentitySettings,
    pub calculator: CalculatorSettings,
    pub cache: CacheSettings,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::new("postgres://localhost/lcfs"),
            scheduler: SchedulerSettings::default(),
            consumer: ConsumerSettings::default(),
            identity: IdentitySettings::default(),
            calculator: CalculatorSettings::default(),
            cache: CacheSettings::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from `lcfs.toml` (if present) and the environment
    pub fn load() -> Result<Self, ServiceError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("lcfs").required(false))
            .add_source(
                config::Environment::with_prefix("LCFS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        Self::from_config(builder.build()?)
    }

    /// Deserializes and validates an already-built configuration
    pub fn from_config(source: config::Config) -> Result<Self, ServiceError> {
        let config: Self = source.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints the types cannot express
    pub fn validate(&self) -> Result<(), ServiceError> {
        self.identity
            .validate()
            .map_err(|e| ServiceError::InvalidConfig(e.to_string()))?;
        if self.database.url.is_empty() {
            return Err(ServiceError::InvalidConfig("database.url is required".into()));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ServiceError::InvalidConfig(
                "database.min_connections exceeds max_connections".into(),
            ));
        }
        if self.scheduler.auto_submit_after_days < 1 {
            return Err(ServiceError::InvalidConfig(
                "scheduler.auto_submit_after_days must be at least 1".into(),
            ));
        }
        if self.scheduler.tick_interval_secs == 0 || self.consumer.poll_interval_ms == 0 {
            return Err(ServiceError::InvalidConfig("job intervals must be non-zero".into()));
        }
        if self.consumer.max_attempts == 0 || self.consumer.batch_size == 0 {
            return Err(ServiceError::InvalidConfig(
                "consumer.max_attempts and consumer.batch_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn overridden(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ServiceError> {
        let mut builder = config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).map_err(ServiceError::from)?;
        }
        ServiceConfig::from_config(builder.build()?)
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.auto_submit_after_days, 30);
        assert_eq!(config.calculator.low_carbon_penalty_per_unit, dec!(600));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_empty_source_yields_defaults() {
        let config = overridden(&[]).expect("defaults");
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_overrides_nested_values() {
        let config = overridden(&[
            ("database.url", "postgres://db/lcfs"),
            ("scheduler.auto_submit_after_days", "10"),
            ("consumer.batch_size", "5"),
            ("log_format", "json"),
        ])
        .expect("overrides");
        assert_eq!(config.database.url, "postgres://db/lcfs");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.scheduler.auto_submit_after_days, 10);
        assert_eq!(config.consumer.batch_size, 5);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = overridden(&[("identity.jwt_secret", "short")]).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfig(_)));
    }

    #[test]
    fn test_inverted_pool_bounds_rejected() {
        let mut config = ServiceConfig::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_day_auto_submit_rejected() {
        let mut config = ServiceConfig::default();
        config.scheduler.auto_submit_after_days = 0;
        assert!(config.validate().is_err());
    }
}
