//! Error types for service discovery.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised inside the discovery subsystem.
///
/// Most public registry and load balancer operations translate these into
/// `false`/`None` results after logging them; the typed error is what
/// health checkers and internal helpers propagate.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No service is registered under the given id.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// A shared lock was poisoned by a panicking holder.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// A health probe could not be carried out.
    #[error("Health check failed for {target}: {reason}")]
    HealthCheckFailed { target: String, reason: String },

    /// An operation did not finish within its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A health check URL could not be used.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A status string did not name a known service status.
    #[error("Invalid service status: {0}")]
    InvalidStatus(String),

    /// A strategy string did not name a known load balancing strategy.
    #[error("Invalid load balancing strategy: {0}")]
    InvalidStrategy(String),

    /// No tokio runtime was available to spawn background tasks.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DiscoveryError {
    /// Check if this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Timeout(_)
                | DiscoveryError::Io(_)
                | DiscoveryError::HealthCheckFailed { .. }
        )
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            DiscoveryError::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            DiscoveryError::LockPoisoned(_) => "LOCK_POISONED",
            DiscoveryError::HealthCheckFailed { .. } => "HEALTH_CHECK_FAILED",
            DiscoveryError::Timeout(_) => "TIMEOUT",
            DiscoveryError::InvalidUrl(_) => "INVALID_URL",
            DiscoveryError::InvalidStatus(_) => "INVALID_STATUS",
            DiscoveryError::InvalidStrategy(_) => "INVALID_STRATEGY",
            DiscoveryError::Runtime(_) => "RUNTIME_ERROR",
            DiscoveryError::Io(_) => "IO_ERROR",
            DiscoveryError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
