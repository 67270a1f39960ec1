//! Core value types: service records, statuses and probe protocols.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::DiscoveryError;

/// Default window within which a heartbeat keeps a healthy service healthy.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Liveness status of a registered service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Last probe succeeded
    Healthy,
    /// Last probe failed
    Unhealthy,
    /// Registered but not yet confirmed by a probe
    Starting,
    /// Shutting down; skipped by the health monitor
    Stopping,
    /// Never observed
    #[default]
    Unknown,
}

impl ServiceStatus {
    /// Get status as string
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "healthy" => Ok(ServiceStatus::Healthy),
            "unhealthy" => Ok(ServiceStatus::Unhealthy),
            "starting" => Ok(ServiceStatus::Starting),
            "stopping" => Ok(ServiceStatus::Stopping),
            "unknown" => Ok(ServiceStatus::Unknown),
            other => Err(DiscoveryError::InvalidStatus(other.to_string())),
        }
    }
}

/// Probe used to decide whether a service is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckProtocol {
    /// HTTP GET, healthy iff the response status is 200
    Http,
    /// Plain TCP connect
    Tcp,
    /// ICMP echo through the OS `ping` utility
    Ping,
}

impl CheckProtocol {
    /// Pick the probe for a service.
    ///
    /// An explicit `health_check_url` always wins; otherwise the advisory
    /// `protocol` field selects HTTP or TCP, and anything else falls back to
    /// ping.
    pub fn for_service(service: &ServiceInfo) -> Self {
        if service.health_check_url.is_some() {
            return CheckProtocol::Http;
        }
        match service.protocol.to_lowercase().as_str() {
            "http" => CheckProtocol::Http,
            "tcp" => CheckProtocol::Tcp,
            _ => CheckProtocol::Ping,
        }
    }
}

impl std::fmt::Display for CheckProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckProtocol::Http => write!(f, "http"),
            CheckProtocol::Tcp => write!(f, "tcp"),
            CheckProtocol::Ping => write!(f, "ping"),
        }
    }
}

/// One registered service instance.
///
/// The registry owns the canonical copy; values handed out by queries are
/// snapshots and changing them has no effect on the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Unique id within a registry; generated on registration when empty
    #[serde(default)]
    pub service_id: String,
    /// Agent that owns this service
    pub agent_id: String,
    /// Human-readable name
    pub service_name: String,
    /// Primary discovery filter, e.g. "agent"
    pub service_type: String,
    pub host: String,
    pub port: u16,
    /// Advisory transport: "http", "tcp", anything else is probed with ping
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Overrides the synthesized `http://host:port/health`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub registration_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl ServiceInfo {
    /// Create a new service record with an empty id and `Unknown` status.
    pub fn new(
        agent_id: impl Into<String>,
        service_name: impl Into<String>,
        service_type: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            service_id: String::new(),
            agent_id: agent_id.into(),
            service_name: service_name.into(),
            service_type: service_type.into(),
            host: host.into(),
            port,
            protocol: default_protocol(),
            status: ServiceStatus::Unknown,
            capabilities: Vec::new(),
            metadata: HashMap::new(),
            health_check_url: None,
            last_heartbeat: now,
            registration_time: now,
            tags: Vec::new(),
            version: default_version(),
        }
    }

    /// Set an explicit service id.
    pub fn with_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    /// Set the advisory protocol.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    /// Add a capability.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Set the health check URL.
    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Set version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Assign a fresh UUID if no id was given. Returns the id.
    pub(crate) fn ensure_id(&mut self) -> &str {
        if self.service_id.trim().is_empty() {
            self.service_id = Uuid::new_v4().to_string();
        }
        &self.service_id
    }

    /// Refresh the heartbeat timestamp.
    pub fn update_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Time elapsed since the last heartbeat (zero if the clock went backwards).
    pub fn heartbeat_age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Healthy iff the status is `Healthy` and the heartbeat is younger than `timeout`.
    pub fn is_healthy(&self, timeout: Duration) -> bool {
        self.status == ServiceStatus::Healthy && self.heartbeat_age() < timeout
    }

    /// `host:port` pair used by socket-level probes.
    ///
    /// IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The URL an HTTP health check should hit.
    pub fn health_url(&self) -> String {
        self.health_check_url
            .clone()
            .unwrap_or_else(|| format!("http://{}/health", self.address()))
    }

    /// Check whether every requested tag is present.
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServiceInfo {
        ServiceInfo::new("agent-1", "ocr-service", "agent", "localhost", 9000)
    }

    #[test]
    fn test_new_service_defaults() {
        let info = sample();
        assert!(info.service_id.is_empty());
        assert_eq!(info.status, ServiceStatus::Unknown);
        assert_eq!(info.protocol, "http");
        assert_eq!(info.version, "1.0.0");
    }

    #[test]
    fn test_builder_deduplicates() {
        let info = sample()
            .with_capability("ocr")
            .with_capability("ocr")
            .with_tag("vision")
            .with_tag("vision");
        assert_eq!(info.capabilities, vec!["ocr"]);
        assert_eq!(info.tags, vec!["vision"]);
    }

    #[test]
    fn test_ensure_id_generates_once() {
        let mut info = sample();
        let id = info.ensure_id().to_string();
        assert!(!id.is_empty());
        assert_eq!(info.ensure_id(), id);

        let mut explicit = sample().with_id("fixed");
        assert_eq!(explicit.ensure_id(), "fixed");
    }

    #[test]
    fn test_is_healthy_requires_status_and_fresh_heartbeat() {
        let mut info = sample().with_status(ServiceStatus::Healthy);
        assert!(info.is_healthy(DEFAULT_HEALTH_TIMEOUT));

        info.last_heartbeat = Utc::now() - chrono::Duration::seconds(61);
        assert!(!info.is_healthy(DEFAULT_HEALTH_TIMEOUT));

        info.update_heartbeat();
        assert!(info.is_healthy(DEFAULT_HEALTH_TIMEOUT));

        for status in [
            ServiceStatus::Unhealthy,
            ServiceStatus::Starting,
            ServiceStatus::Stopping,
            ServiceStatus::Unknown,
        ] {
            info.status = status;
            assert!(!info.is_healthy(DEFAULT_HEALTH_TIMEOUT));
        }
    }

    #[test]
    fn test_check_protocol_selection() {
        assert_eq!(CheckProtocol::for_service(&sample()), CheckProtocol::Http);
        assert_eq!(
            CheckProtocol::for_service(&sample().with_protocol("TCP")),
            CheckProtocol::Tcp
        );
        assert_eq!(
            CheckProtocol::for_service(&sample().with_protocol("grpc")),
            CheckProtocol::Ping
        );
        assert_eq!(
            CheckProtocol::for_service(
                &sample()
                    .with_protocol("tcp")
                    .with_health_check_url("http://localhost:9000/ready")
            ),
            CheckProtocol::Http
        );
    }

    #[test]
    fn test_health_url() {
        assert_eq!(sample().health_url(), "http://localhost:9000/health");
        assert_eq!(
            sample()
                .with_health_check_url("http://10.0.0.1/ping")
                .health_url(),
            "http://10.0.0.1/ping"
        );
    }

    #[test]
    fn test_ipv6_hosts_are_bracketed() {
        let info = ServiceInfo::new("agent-1", "ocr-service", "agent", "::1", 9000);
        assert_eq!(info.address(), "[::1]:9000");
        assert_eq!(info.health_url(), "http://[::1]:9000/health");

        let info = ServiceInfo::new("agent-1", "ocr-service", "agent", "[fe80::1]", 80);
        assert_eq!(info.address(), "[fe80::1]:80");
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!(
            "Healthy".parse::<ServiceStatus>().unwrap(),
            ServiceStatus::Healthy
        );
        assert_eq!(ServiceStatus::Stopping.to_string(), "stopping");
        assert!("degraded".parse::<ServiceStatus>().is_err());
    }

    #[test]
    fn test_deserialize_minimal_manifest_entry() {
        let info: ServiceInfo = serde_json::from_value(serde_json::json!({
            "agent_id": "agent-7",
            "service_name": "planner",
            "service_type": "agent",
            "host": "127.0.0.1",
            "port": 8080,
            "capabilities": ["plan"]
        }))
        .unwrap();
        assert!(info.service_id.is_empty());
        assert_eq!(info.protocol, "http");
        assert_eq!(info.status, ServiceStatus::Unknown);
        assert_eq!(info.capabilities, vec!["plan"]);
    }
}
