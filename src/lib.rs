//! # Zihin
//!
//! Service discovery for agent systems: a registry of running services, a
//! health monitor that keeps their status current, and a load balancer that
//! picks one healthy service per request.
//!
//! ## Core Components
//!
//! - **[ServiceRegistry]**: Indexed store of [ServiceInfo] records
//! - **[HealthMonitor]**: Periodic HTTP/TCP/ping probes feeding back into the registry
//! - **[LoadBalancer]**: Strategy-driven selection with connection and latency feedback
//! - **[ServiceDiscoveryManager]**: Owns all three and their background loops
//!
//! ## Quick Start
//!
//! ```rust
//! use zihin::{AgentServiceRegistration, SelectionRequest, ServiceDiscoveryManager};
//!
//! let manager = ServiceDiscoveryManager::default();
//! let id = manager
//!     .register_agent_service(
//!         AgentServiceRegistration::new("agent-1", "OCR Agent", "localhost", 9000)
//!             .with_capability("ocr"),
//!     )
//!     .unwrap();
//!
//! let agent = manager
//!     .select_agent(SelectionRequest::new().capability("ocr"))
//!     .unwrap();
//! assert_eq!(agent.service_id, id);
//! manager.release_agent(&agent.service_id);
//! ```

pub use zihin_discovery::*;
