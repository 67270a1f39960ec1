//! # Zihin Discovery - Service Registry, Health Monitoring and Load Balancing
//!
//! In-process coordination layer that lets agents find each other.
//!
//! ## Features
//!
//! - **Service Registry**: Services indexed by agent, type and capability,
//!   with heartbeat-based health and periodic eviction of stale entries
//! - **Health Monitoring**: Concurrent HTTP, TCP or ping probes per service
//!   (HTTP via `reqwest` with the default `http-health` feature)
//! - **Load Balancing**: Round robin, least connections, weighted round robin,
//!   random, health-based and response-time strategies with live feedback
//! - **Discovery Manager**: One facade owning all three and their background loops
//!
//! ## Example
//!
//! ```rust,ignore
//! use zihin_discovery::{
//!     AgentServiceRegistration, DiscoveryConfigBuilder, SelectionRequest, ServiceDiscoveryManager,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DiscoveryConfigBuilder::from_env()?.build()?;
//!     let manager = ServiceDiscoveryManager::new(config);
//!     manager.start()?;
//!
//!     manager.register_agent_service(
//!         AgentServiceRegistration::new("agent-1", "OCR Agent", "localhost", 9000)
//!             .with_capability("ocr"),
//!     );
//!
//!     let started = std::time::Instant::now();
//!     if let Some(agent) = manager.select_agent(SelectionRequest::new().capability("ocr")) {
//!         // ... call the agent ...
//!         manager.record_agent_response_time(&agent.service_id, started.elapsed());
//!         manager.release_agent(&agent.service_id);
//!     }
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```

pub mod balancer;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod registry;
pub mod types;

pub use balancer::{LoadBalancer, LoadBalancerStats, LoadBalancingStrategy, SelectionRequest};
pub use config::{
    ConfigError, DiscoveryConfig, DiscoveryConfigBuilder, HealthMonitorConfig, LoadBalancerConfig,
    RegistryConfig,
};
pub use error::{DiscoveryError, DiscoveryResult};
pub use health::{
    CycleReport, HealthChecker, HealthMonitor, HealthStats, HttpHealthChecker, PingHealthChecker,
    TcpHealthChecker,
};
pub use manager::{
    AgentHealth, AgentLifecycleEvent, AgentServiceRegistration, DiscoveryStats, ManagerState,
    ManagerStats, ServiceDiscoveryManager, ServiceHealth,
};
pub use registry::{DeregistrationReason, RegistryEvent, RegistryStats, ServiceRegistry};
pub use types::{CheckProtocol, DEFAULT_HEALTH_TIMEOUT, ServiceInfo, ServiceStatus};
