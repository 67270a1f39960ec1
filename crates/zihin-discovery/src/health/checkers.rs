//! Protocol-specific health probes.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::types::{CheckProtocol, ServiceInfo};

/// Extra time granted to the ping subprocess beyond its own `-W`/`-w` wait.
pub const PING_GRACE: Duration = Duration::from_secs(1);

/// A liveness probe for one [`CheckProtocol`].
///
/// `Ok(false)` is a definite negative answer (non-200 response, non-zero
/// exit code); `Err` means the probe itself could not complete. The monitor
/// treats both as unhealthy.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Protocol this checker serves.
    fn protocol(&self) -> CheckProtocol;

    /// Probe one service.
    async fn check(&self, service: &ServiceInfo) -> DiscoveryResult<bool>;
}

// ============================================================================
// HTTP
// ============================================================================

/// `GET` the service's health URL; healthy iff the response is `200 OK`.
pub struct HttpHealthChecker {
    timeout: Duration,
    /// `None` when the client could not be built; every probe then fails
    #[cfg(feature = "http-health")]
    client: Option<reqwest::Client>,
}

impl HttpHealthChecker {
    /// Create a checker, logging a client build failure instead of returning it.
    ///
    /// A checker whose client failed to build reports every service as
    /// unhealthy. Use [`try_new`](Self::try_new) to surface the error.
    pub fn new(timeout: Duration) -> Self {
        match Self::try_new(timeout) {
            Ok(checker) => checker,
            Err(e) => {
                error!(error = %e, "HTTP health checks disabled");
                Self {
                    timeout,
                    #[cfg(feature = "http-health")]
                    client: None,
                }
            }
        }
    }

    /// Create a checker.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::HealthCheckFailed` if the HTTP client cannot
    /// be built.
    pub fn try_new(timeout: Duration) -> DiscoveryResult<Self> {
        #[cfg(feature = "http-health")]
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| DiscoveryError::HealthCheckFailed {
                target: "http client".to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            timeout,
            #[cfg(feature = "http-health")]
            client: Some(client),
        })
    }

    /// Probe an explicit URL.
    pub async fn check_url(&self, url: &str) -> DiscoveryResult<bool> {
        let status = self.fetch_status(url).await?;
        debug!(url = %url, status, "HTTP health check response");
        Ok(status == 200)
    }

    #[cfg(feature = "http-health")]
    async fn fetch_status(&self, url: &str) -> DiscoveryResult<u16> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| DiscoveryError::HealthCheckFailed {
                target: url.to_string(),
                reason: "HTTP client unavailable".to_string(),
            })?;
        let response = client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DiscoveryError::Timeout(format!("GET {url}"))
                } else if e.is_builder() {
                    DiscoveryError::InvalidUrl(url.to_string())
                } else {
                    DiscoveryError::HealthCheckFailed {
                        target: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;
        Ok(response.status().as_u16())
    }

    #[cfg(not(feature = "http-health"))]
    async fn fetch_status(&self, url: &str) -> DiscoveryResult<u16> {
        tokio::time::timeout(self.timeout, super::minimal_http::get_status(url))
            .await
            .map_err(|_| DiscoveryError::Timeout(format!("GET {url}")))?
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    fn protocol(&self) -> CheckProtocol {
        CheckProtocol::Http
    }

    async fn check(&self, service: &ServiceInfo) -> DiscoveryResult<bool> {
        self.check_url(&service.health_url()).await
    }
}

// ============================================================================
// TCP
// ============================================================================

/// Open and immediately close a TCP connection to `host:port`.
pub struct TcpHealthChecker {
    timeout: Duration,
}

impl TcpHealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthChecker for TcpHealthChecker {
    fn protocol(&self) -> CheckProtocol {
        CheckProtocol::Tcp
    }

    async fn check(&self, service: &ServiceInfo) -> DiscoveryResult<bool> {
        let address = service.address();
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| DiscoveryError::Timeout(format!("connect {address}")))??;
        drop(stream);
        Ok(true)
    }
}

// ============================================================================
// Ping
// ============================================================================

/// One ICMP echo through the system `ping` binary; healthy iff it exits 0.
pub struct PingHealthChecker {
    timeout: Duration,
}

impl PingHealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Arguments for a single ping with a reply deadline.
///
/// Windows takes the deadline in milliseconds, POSIX `ping` in whole
/// seconds (at least one).
pub fn ping_args(host: &str, timeout: Duration, windows: bool) -> Vec<String> {
    if windows {
        vec![
            "-n".to_string(),
            "1".to_string(),
            "-w".to_string(),
            timeout.as_millis().to_string(),
            host.to_string(),
        ]
    } else {
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            timeout.as_secs().max(1).to_string(),
            host.to_string(),
        ]
    }
}

#[async_trait]
impl HealthChecker for PingHealthChecker {
    fn protocol(&self) -> CheckProtocol {
        CheckProtocol::Ping
    }

    async fn check(&self, service: &ServiceInfo) -> DiscoveryResult<bool> {
        let args = ping_args(&service.host, self.timeout, cfg!(windows));
        let mut command = Command::new("ping");
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = tokio::time::timeout(self.timeout + PING_GRACE, command.status())
            .await
            .map_err(|_| DiscoveryError::Timeout(format!("ping {}", service.host)))??;

        debug!(host = %service.host, code = ?status.code(), "Ping finished");
        Ok(status.success())
    }
}
