//! # Discovery Configuration
//!
//! Configuration for the registry, the health monitor and the load balancer,
//! loadable from environment variables so a node can be tuned without a
//! rebuild.
//!
//! ## Environment Variables
//!
//! ### Registry
//! - `ZIHIN_HEALTH_TIMEOUT_SECS` - Heartbeat age after which a service is unhealthy (default: 30)
//! - `ZIHIN_CLEANUP_INTERVAL_SECS` - Period of the stale service cleanup pass (default: 60)
//! - `ZIHIN_ENABLE_CLEANUP` - Run the cleanup loop (default: true)
//!
//! ### Health Monitor
//! - `ZIHIN_HEALTH_CHECK_INTERVAL_SECS` - Period of a full check cycle (default: 30)
//! - `ZIHIN_HEALTH_CHECK_TIMEOUT_SECS` - Timeout of a single probe (default: 5)
//! - `ZIHIN_ENABLE_HEALTH_CHECKS` - Run the health check loop (default: true)
//!
//! ### Load Balancer
//! - `ZIHIN_LB_STRATEGY` - `round_robin`, `least_connections`, `weighted_round_robin`,
//!   `random`, `health_based` or `response_time` (default: round_robin)
//! - `ZIHIN_LB_HISTORY_SIZE` - Response time samples kept per service (default: 100)
//! - `ZIHIN_LB_RESPONSE_TIME_WINDOW` - Most recent samples averaged by the
//!   response time strategy (default: 10)

use std::{env, time::Duration};

use tracing::warn;

use crate::balancer::LoadBalancingStrategy;
use crate::error::DiscoveryResult;
use crate::types::DEFAULT_HEALTH_TIMEOUT;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Heartbeat age after which a `Healthy` service counts as unhealthy
    pub health_timeout: Duration,
    /// Period of the cleanup pass
    pub cleanup_interval: Duration,
    /// Whether the manager runs the cleanup loop
    pub enable_cleanup: bool,
    /// Capacity of the registry event channel
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            cleanup_interval: Duration::from_secs(60),
            enable_cleanup: true,
            event_capacity: 256,
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Period of a full check cycle
    pub check_interval: Duration,
    /// Timeout applied to every probe
    pub check_timeout: Duration,
    /// Whether the manager runs the health check loop
    pub enable: bool,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
            enable: true,
        }
    }
}

/// Load balancer configuration
#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    /// Initial selection strategy
    pub strategy: LoadBalancingStrategy,
    /// Response time samples retained per service
    pub history_size: usize,
    /// Samples averaged by the response time strategy
    pub response_time_window: usize,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            history_size: 100,
            response_time_window: 10,
        }
    }
}

/// Complete discovery configuration
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    pub registry: RegistryConfig,
    pub health: HealthMonitorConfig,
    pub load_balancer: LoadBalancerConfig,
}

impl DiscoveryConfig {
    /// Load and validate configuration from `ZIHIN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Config` if a variable is malformed or the
    /// resulting configuration is invalid.
    pub fn from_env() -> DiscoveryResult<Self> {
        Ok(DiscoveryConfigBuilder::from_env()?.build()?)
    }
}

/// Builder for `DiscoveryConfig` with environment variable support
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfigBuilder {
    registry: RegistryConfig,
    health: HealthMonitorConfig,
    load_balancer: LoadBalancerConfig,
}

impl DiscoveryConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::default();

        // Registry
        if let Some(secs) = get_env_u64("ZIHIN_HEALTH_TIMEOUT_SECS")? {
            builder.registry.health_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64("ZIHIN_CLEANUP_INTERVAL_SECS")? {
            builder.registry.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(enable) = get_env_bool("ZIHIN_ENABLE_CLEANUP")? {
            builder.registry.enable_cleanup = enable;
        }

        // Health monitor
        if let Some(secs) = get_env_u64("ZIHIN_HEALTH_CHECK_INTERVAL_SECS")? {
            builder.health.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64("ZIHIN_HEALTH_CHECK_TIMEOUT_SECS")? {
            builder.health.check_timeout = Duration::from_secs(secs);
        }
        if let Some(enable) = get_env_bool("ZIHIN_ENABLE_HEALTH_CHECKS")? {
            builder.health.enable = enable;
        }

        // Load balancer
        if let Some(strategy) = get_env_string("ZIHIN_LB_STRATEGY") {
            builder.load_balancer.strategy =
                strategy.parse().map_err(|_| ConfigError::InvalidEnvVar {
                    key: "ZIHIN_LB_STRATEGY".to_string(),
                    message: format!("unknown strategy '{strategy}'"),
                })?;
        }
        if let Some(size) = get_env_usize("ZIHIN_LB_HISTORY_SIZE")? {
            builder.load_balancer.history_size = size;
        }
        if let Some(window) = get_env_usize("ZIHIN_LB_RESPONSE_TIME_WINDOW")? {
            builder.load_balancer.response_time_window = window;
        }

        Ok(builder)
    }

    /// Set the heartbeat timeout used by health filtering and cleanup
    #[must_use]
    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.registry.health_timeout = timeout;
        self
    }

    /// Set the cleanup interval
    #[must_use]
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.registry.cleanup_interval = interval;
        self
    }

    /// Enable or disable the cleanup loop
    #[must_use]
    pub fn enable_cleanup(mut self, enable: bool) -> Self {
        self.registry.enable_cleanup = enable;
        self
    }

    /// Set the health check interval
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.health.check_interval = interval;
        self
    }

    /// Set the per-probe timeout
    #[must_use]
    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.health.check_timeout = timeout;
        self
    }

    /// Enable or disable the health check loop
    #[must_use]
    pub fn enable_health_checks(mut self, enable: bool) -> Self {
        self.health.enable = enable;
        self
    }

    /// Set the initial load balancing strategy
    #[must_use]
    pub fn strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.load_balancer.strategy = strategy;
        self
    }

    /// Set the response time history size
    #[must_use]
    pub fn history_size(mut self, size: usize) -> Self {
        self.load_balancer.history_size = size;
        self
    }

    /// Set the response time averaging window
    #[must_use]
    pub fn response_time_window(mut self, window: usize) -> Self {
        self.load_balancer.response_time_window = window;
        self
    }

    /// Validate configuration and build `DiscoveryConfig`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<DiscoveryConfig, ConfigError> {
        self.validate()?;

        Ok(DiscoveryConfig {
            registry: self.registry,
            health: self.health,
            load_balancer: self.load_balancer,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.health_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "registry.health_timeout must be greater than 0".to_string(),
            ));
        }
        if self.registry.cleanup_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "registry.cleanup_interval must be greater than 0".to_string(),
            ));
        }
        if self.registry.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "registry.event_capacity must be greater than 0".to_string(),
            ));
        }

        if self.health.check_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "health.check_interval must be greater than 0".to_string(),
            ));
        }
        if self.health.check_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "health.check_timeout must be greater than 0".to_string(),
            ));
        }
        if self.health.check_timeout >= self.health.check_interval {
            return Err(ConfigError::ValidationError(
                "health.check_timeout must be shorter than health.check_interval".to_string(),
            ));
        }
        // Health cycles refresh heartbeats; a longer period lets healthy services expire
        if self.health.enable && self.health.check_interval > self.registry.health_timeout {
            return Err(ConfigError::ValidationError(
                "health.check_interval must not exceed registry.health_timeout".to_string(),
            ));
        }
        if self.health.enable && self.health.check_interval == self.registry.health_timeout {
            warn!(
                interval_secs = self.health.check_interval.as_secs_f64(),
                "health.check_interval equals registry.health_timeout; services relying on \
                 health checks alone may briefly drop out of discovery between cycles"
            );
        }

        if self.load_balancer.response_time_window == 0 {
            return Err(ConfigError::ValidationError(
                "load_balancer.response_time_window must be greater than 0".to_string(),
            ));
        }
        if self.load_balancer.history_size < self.load_balancer.response_time_window {
            return Err(ConfigError::ValidationError(
                "load_balancer.history_size must be >= load_balancer.response_time_window"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        Err(_) => Ok(None),
    }
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u64 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid usize value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builder() {
        let config = DiscoveryConfigBuilder::new().build().unwrap();
        assert_eq!(config.registry.health_timeout, Duration::from_secs(30));
        assert_eq!(config.registry.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.health.check_interval, Duration::from_secs(30));
        assert_eq!(config.health.check_timeout, Duration::from_secs(5));
        assert_eq!(
            config.load_balancer.strategy,
            LoadBalancingStrategy::RoundRobin
        );
        assert_eq!(config.load_balancer.history_size, 100);
    }

    #[test]
    fn test_builder_validation_zero_timeout() {
        let result = DiscoveryConfigBuilder::new()
            .health_timeout(Duration::ZERO)
            .build();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("registry.health_timeout must be greater than 0")
        );
    }

    #[test]
    fn test_builder_validation_probe_timeout_exceeds_interval() {
        let result = DiscoveryConfigBuilder::new()
            .check_interval(Duration::from_secs(5))
            .check_timeout(Duration::from_secs(5))
            .build();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("health.check_timeout must be shorter")
        );
    }

    #[test]
    fn test_builder_validation_check_interval_exceeds_health_timeout() {
        let result = DiscoveryConfigBuilder::new()
            .health_timeout(Duration::from_secs(10))
            .check_interval(Duration::from_secs(20))
            .build();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("health.check_interval must not exceed registry.health_timeout")
        );

        // Without health checks only external heartbeats matter
        let config = DiscoveryConfigBuilder::new()
            .health_timeout(Duration::from_secs(10))
            .check_interval(Duration::from_secs(20))
            .enable_health_checks(false)
            .build()
            .unwrap();
        assert_eq!(config.health.check_interval, Duration::from_secs(20));

        // Equal periods are accepted
        assert!(
            DiscoveryConfigBuilder::new()
                .health_timeout(Duration::from_secs(30))
                .check_interval(Duration::from_secs(30))
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_builder_validation_history_window() {
        let result = DiscoveryConfigBuilder::new()
            .history_size(5)
            .response_time_window(10)
            .build();
        assert!(result.is_err());

        let result = DiscoveryConfigBuilder::new().response_time_window(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_custom_values() {
        let config = DiscoveryConfigBuilder::new()
            .health_timeout(Duration::from_secs(10))
            .cleanup_interval(Duration::from_secs(20))
            .enable_cleanup(false)
            .enable_health_checks(false)
            .strategy(LoadBalancingStrategy::LeastConnections)
            .build()
            .unwrap();

        assert_eq!(config.registry.health_timeout, Duration::from_secs(10));
        assert_eq!(config.registry.cleanup_interval, Duration::from_secs(20));
        assert!(!config.registry.enable_cleanup);
        assert!(!config.health.enable);
        assert_eq!(
            config.load_balancer.strategy,
            LoadBalancingStrategy::LeastConnections
        );
    }

    #[test]
    fn test_env_parsing_absent_keys() {
        assert_eq!(get_env_bool("ZIHIN_TEST_NONEXISTENT").unwrap(), None);
        assert_eq!(get_env_u64("ZIHIN_TEST_NONEXISTENT").unwrap(), None);
        assert_eq!(get_env_usize("ZIHIN_TEST_NONEXISTENT").unwrap(), None);
    }
}
