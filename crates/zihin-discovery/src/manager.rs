//! Service Discovery Manager
//!
//! Owns one [`ServiceRegistry`], one [`HealthMonitor`] and one
//! [`LoadBalancer`] wired to the same registry, runs their background loops,
//! and exposes an agent-centric API on top of them.
//!
//! # Lifecycle
//!
//! `Created -> Running -> Stopped`. [`start`](ServiceDiscoveryManager::start)
//! spawns the cleanup and health check loops onto the current tokio runtime,
//! plus a loop that drops load balancer state for services leaving the
//! registry, and is a no-op while running; [`stop`](ServiceDiscoveryManager::stop)
//! aborts both loops and waits for them to finish. A stopped manager can be
//! started again.
//!
//! # Example
//!
//! ```rust,no_run
//! use zihin_discovery::{AgentServiceRegistration, SelectionRequest, ServiceDiscoveryManager};
//!
//! # async fn example() -> zihin_discovery::DiscoveryResult<()> {
//! let manager = ServiceDiscoveryManager::default();
//! manager.start()?;
//!
//! manager.register_agent_service(
//!     AgentServiceRegistration::new("agent-1", "OCR Agent", "localhost", 9000)
//!         .with_capability("ocr"),
//! );
//!
//! if let Some(agent) = manager.select_agent(SelectionRequest::new().capability("ocr")) {
//!     // ... call the agent ...
//!     manager.release_agent(&agent.service_id);
//! }
//!
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::balancer::{LoadBalancer, LoadBalancerStats, LoadBalancingStrategy, SelectionRequest};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::health::{HealthChecker, HealthMonitor, HealthStats};
use crate::registry::{RegistryStats, ServiceRegistry};
use crate::types::{ServiceInfo, ServiceStatus};

/// Service type under which agents are registered.
pub const AGENT_SERVICE_TYPE: &str = "agent";

/// Manager lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    #[default]
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerState::Created => write!(f, "created"),
            ManagerState::Running => write!(f, "running"),
            ManagerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What an agent announces about itself when it comes up.
#[derive(Debug, Clone)]
pub struct AgentServiceRegistration {
    pub agent_id: String,
    pub agent_name: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub capabilities: Vec<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub health_check_url: Option<String>,
}

impl AgentServiceRegistration {
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            host: host.into(),
            port,
            protocol: "http".to_string(),
            capabilities: Vec::new(),
            tags: Vec::new(),
            metadata: HashMap::new(),
            health_check_url: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    fn into_service_info(self) -> ServiceInfo {
        let mut info = ServiceInfo::new(
            self.agent_id,
            self.agent_name,
            AGENT_SERVICE_TYPE,
            self.host,
            self.port,
        )
        .with_protocol(self.protocol)
        .with_status(ServiceStatus::Healthy);
        for capability in self.capabilities {
            info = info.with_capability(capability);
        }
        for tag in self.tags {
            info = info.with_tag(tag);
        }
        info.metadata = self.metadata;
        info.health_check_url = self.health_check_url;
        info
    }
}

/// Agent lifecycle notifications delivered by the messaging layer.
#[derive(Debug, Clone)]
pub enum AgentLifecycleEvent {
    Started(AgentServiceRegistration),
    Stopped { agent_id: String },
}

/// Health of one of an agent's services.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service_id: String,
    pub service_name: String,
    pub status: ServiceStatus,
    pub healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub heartbeat_age_secs: u64,
}

/// Health of an agent across all its registered services.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent_id: String,
    /// At least one service is healthy
    pub healthy: bool,
    pub services: Vec<ServiceHealth>,
}

/// Manager-level section of [`DiscoveryStats`].
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub state: ManagerState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub background_tasks: usize,
}

/// Combined statistics of all discovery components.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryStats {
    pub manager: ManagerStats,
    pub registry: RegistryStats,
    pub health: HealthStats,
    pub load_balancer: LoadBalancerStats,
}

#[derive(Debug)]
struct ManagerInner {
    state: ManagerState,
    started_at: Option<DateTime<Utc>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Facade over registry, health monitor and load balancer.
pub struct ServiceDiscoveryManager {
    config: DiscoveryConfig,
    registry: Arc<ServiceRegistry>,
    health_monitor: Arc<HealthMonitor>,
    load_balancer: Arc<LoadBalancer>,
    created_at: DateTime<Utc>,
    inner: Mutex<ManagerInner>,
}

impl Default for ServiceDiscoveryManager {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

impl ServiceDiscoveryManager {
    pub fn new(config: DiscoveryConfig) -> Self {
        let registry = Arc::new(ServiceRegistry::new(config.registry.clone()));
        let health_monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            config.health.clone(),
        ));
        let load_balancer = Arc::new(LoadBalancer::new(
            Arc::clone(&registry),
            config.load_balancer.clone(),
        ));

        Self {
            config,
            registry,
            health_monitor,
            load_balancer,
            created_at: Utc::now(),
            inner: Mutex::new(ManagerInner {
                state: ManagerState::Created,
                started_at: None,
                tasks: Vec::new(),
            }),
        }
    }

    /// Install a custom health checker. Must be called before the monitor
    /// handle is shared (i.e. before `start` or `health_monitor().clone()`).
    pub fn with_health_checker(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        match Arc::get_mut(&mut self.health_monitor) {
            Some(monitor) => monitor.set_checker(checker),
            None => warn!(
                protocol = %checker.protocol(),
                "Health monitor already shared; custom checker ignored"
            ),
        }
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health_monitor
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }

    fn lock(&self) -> DiscoveryResult<MutexGuard<'_, ManagerInner>> {
        self.inner
            .lock()
            .map_err(|e| DiscoveryError::LockPoisoned(format!("discovery manager: {e}")))
    }

    pub fn state(&self) -> ManagerState {
        self.lock().map(|i| i.state).unwrap_or(ManagerState::Stopped)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ManagerState::Running
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Spawn the cleanup, health check and balancer eviction loops.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Runtime` when called outside a tokio runtime.
    pub fn start(&self) -> DiscoveryResult<()> {
        let handle = Handle::try_current()
            .map_err(|e| DiscoveryError::Runtime(format!("no tokio runtime: {e}")))?;

        let mut inner = self.lock()?;
        if inner.state == ManagerState::Running {
            return Ok(());
        }

        if self.config.registry.enable_cleanup {
            let registry = Arc::clone(&self.registry);
            inner.tasks.push(handle.spawn(registry.run_cleanup_loop()));
        }
        if self.config.health.enable {
            let monitor = Arc::clone(&self.health_monitor);
            inner.tasks.push(handle.spawn(monitor.run()));
        }

        // Removals that happened while stopped never reach the event loop
        self.load_balancer.prune_unregistered();
        let balancer = Arc::clone(&self.load_balancer);
        let events = self.registry.subscribe();
        inner.tasks.push(handle.spawn(balancer.run_eviction_loop(events)));

        inner.state = ManagerState::Running;
        inner.started_at = Some(Utc::now());

        info!(
            background_tasks = inner.tasks.len(),
            strategy = %self.load_balancer.strategy(),
            "Service discovery started"
        );
        Ok(())
    }

    /// Cancel the background loops and wait for them to finish.
    pub async fn stop(&self) {
        let tasks = match self.lock() {
            Ok(mut inner) => {
                if inner.state != ManagerState::Running {
                    return;
                }
                inner.state = ManagerState::Stopped;
                std::mem::take(&mut inner.tasks)
            }
            Err(e) => {
                error!(error = %e, "Failed to stop service discovery");
                return;
            }
        };

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                error!(error = %e, "Background task failed");
            }
        }

        info!("Service discovery stopped");
    }

    // ------------------------------------------------------------------------
    // Agent API
    // ------------------------------------------------------------------------

    /// Register an agent as a `Healthy` service of type `agent`.
    ///
    /// Returns the generated service id.
    pub fn register_agent_service(&self, registration: AgentServiceRegistration) -> Option<String> {
        let agent_id = registration.agent_id.clone();
        match self.registry.register(registration.into_service_info()) {
            Ok(service_id) => Some(service_id),
            Err(e) => {
                error!(agent_id = %agent_id, error = %e, "Failed to register agent service");
                None
            }
        }
    }

    /// Remove every service owned by an agent.
    ///
    /// Returns `false` if the agent had nothing registered.
    pub fn unregister_agent_service(&self, agent_id: &str) -> bool {
        let services = self.registry.services_for_agent(agent_id);
        let mut removed = false;
        for service in services {
            if self.registry.unregister_service(&service.service_id) {
                self.load_balancer.forget_service(&service.service_id);
                removed = true;
            }
        }
        removed
    }

    /// Apply an agent lifecycle notification.
    pub fn handle_lifecycle_event(&self, event: AgentLifecycleEvent) -> bool {
        match event {
            AgentLifecycleEvent::Started(registration) => {
                self.register_agent_service(registration).is_some()
            }
            AgentLifecycleEvent::Stopped { agent_id } => self.unregister_agent_service(&agent_id),
        }
    }

    /// Healthy agents, optionally filtered by capability and tags.
    pub fn discover_agents(&self, capability: Option<&str>, tags: Option<&[String]>) -> Vec<ServiceInfo> {
        self.registry
            .discover_services(Some(AGENT_SERVICE_TYPE), capability, tags, true)
    }

    /// Select one healthy agent; the request's service type is forced to `agent`.
    pub fn select_agent(&self, request: SelectionRequest) -> Option<ServiceInfo> {
        let request = SelectionRequest {
            service_type: Some(AGENT_SERVICE_TYPE.to_string()),
            ..request
        };
        self.load_balancer.select_service(&request)
    }

    pub fn release_agent(&self, service_id: &str) -> bool {
        self.load_balancer.release_service(service_id)
    }

    pub fn record_agent_response_time(&self, service_id: &str, response_time: Duration) {
        self.load_balancer.record_response_time(service_id, response_time);
    }

    pub fn set_agent_weight(&self, service_id: &str, weight: f64) -> f64 {
        self.load_balancer.set_service_weight(service_id, weight)
    }

    pub fn change_load_balancing_strategy(&self, strategy: LoadBalancingStrategy) {
        self.load_balancer.change_strategy(strategy);
    }

    /// Health of an agent's services, `None` if it has none registered.
    pub fn get_agent_health(&self, agent_id: &str) -> Option<AgentHealth> {
        let timeout = self.registry.health_timeout();
        let mut services: Vec<ServiceHealth> = self
            .registry
            .services_for_agent(agent_id)
            .into_iter()
            .map(|s| ServiceHealth {
                healthy: s.is_healthy(timeout),
                heartbeat_age_secs: s.heartbeat_age().as_secs(),
                service_id: s.service_id,
                service_name: s.service_name,
                status: s.status,
                last_heartbeat: s.last_heartbeat,
            })
            .collect();

        if services.is_empty() {
            return None;
        }
        services.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        Some(AgentHealth {
            agent_id: agent_id.to_string(),
            healthy: services.iter().any(|s| s.healthy),
            services,
        })
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    pub fn get_comprehensive_stats(&self) -> DiscoveryStats {
        let (state, started_at, background_tasks) = match self.lock() {
            Ok(inner) => (inner.state, inner.started_at, inner.tasks.len()),
            Err(_) => (ManagerState::Stopped, None, 0),
        };
        let uptime_secs = match (state, started_at) {
            (ManagerState::Running, Some(started)) => Utc::now()
                .signed_duration_since(started)
                .num_seconds()
                .max(0) as u64,
            _ => 0,
        };

        DiscoveryStats {
            manager: ManagerStats {
                state,
                created_at: self.created_at,
                started_at,
                uptime_secs,
                background_tasks,
            },
            registry: self.registry.stats(),
            health: self.health_monitor.stats(),
            load_balancer: self.load_balancer.stats(),
        }
    }
}

impl Drop for ServiceDiscoveryManager {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut() {
            for task in &inner.tasks {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfigBuilder;

    fn quiet_manager() -> ServiceDiscoveryManager {
        let config = DiscoveryConfigBuilder::new()
            .enable_health_checks(false)
            .enable_cleanup(false)
            .build()
            .unwrap();
        ServiceDiscoveryManager::new(config)
    }

    fn ocr_agent(id: &str) -> AgentServiceRegistration {
        AgentServiceRegistration::new(id, format!("{id} OCR"), "localhost", 9000)
            .with_capability("ocr")
            .with_tag("vision")
    }

    #[test]
    fn test_start_requires_runtime() {
        let manager = ServiceDiscoveryManager::default();
        let err = manager.start().unwrap_err();
        assert_eq!(err.error_code(), "RUNTIME_ERROR");
        assert_eq!(manager.state(), ManagerState::Created);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let manager = ServiceDiscoveryManager::default();
        assert_eq!(manager.state(), ManagerState::Created);

        manager.start().unwrap();
        manager.start().unwrap();
        assert!(manager.is_running());
        assert_eq!(manager.get_comprehensive_stats().manager.background_tasks, 3);

        manager.stop().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert_eq!(manager.get_comprehensive_stats().manager.background_tasks, 0);

        // Stopping twice is harmless, and the manager can be restarted
        manager.stop().await;
        manager.start().unwrap();
        assert!(manager.is_running());
        manager.stop().await;
    }

    #[test]
    fn test_register_and_discover_agent() {
        let manager = quiet_manager();
        let id = manager.register_agent_service(ocr_agent("agent-1")).unwrap();

        let found = manager.discover_agents(Some("ocr"), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, id);
        assert_eq!(found[0].service_type, AGENT_SERVICE_TYPE);
        assert_eq!(found[0].status, ServiceStatus::Healthy);

        assert!(manager.discover_agents(Some("speech"), None).is_empty());
    }

    #[test]
    fn test_select_and_release_agent() {
        let manager = quiet_manager();
        let id = manager.register_agent_service(ocr_agent("agent-1")).unwrap();

        let selected = manager
            .select_agent(SelectionRequest::new().capability("ocr").service_type("ignored"))
            .unwrap();
        assert_eq!(selected.service_id, id);
        assert_eq!(manager.load_balancer().connection_count(&id), 1);

        assert!(manager.release_agent(&id));
        assert_eq!(manager.load_balancer().connection_count(&id), 0);
    }

    #[test]
    fn test_unregister_agent_removes_all_services() {
        let manager = quiet_manager();
        let first = manager.register_agent_service(ocr_agent("agent-1")).unwrap();
        manager.register_agent_service(ocr_agent("agent-1")).unwrap();
        manager.register_agent_service(ocr_agent("agent-2")).unwrap();
        manager.record_agent_response_time(&first, Duration::from_millis(20));

        assert!(manager.unregister_agent_service("agent-1"));
        assert!(!manager.unregister_agent_service("agent-1"));
        assert_eq!(manager.registry().service_count(), 1);
        assert_eq!(manager.load_balancer().average_response_time(&first), None);
    }

    #[tokio::test]
    async fn test_cleanup_eviction_clears_balancer_state() {
        let manager = quiet_manager();
        manager.start().unwrap();

        let id = manager.register_agent_service(ocr_agent("agent-1")).unwrap();
        manager.select_agent(SelectionRequest::new()).unwrap();
        manager.record_agent_response_time(&id, Duration::from_millis(20));
        manager.set_agent_weight(&id, 3.0);
        for i in 0..100 {
            manager.record_agent_response_time(&format!("ghost-{i}"), Duration::from_millis(5));
        }
        assert_eq!(manager.load_balancer().stats().average_response_times.len(), 1);

        manager
            .registry()
            .update_service_status(&id, ServiceStatus::Unhealthy);
        assert_eq!(manager.registry().cleanup_stale(), vec![id.clone()]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = manager.load_balancer().stats();
        assert!(stats.service_distributions.is_empty());
        assert!(stats.active_connections.is_empty());
        assert!(stats.average_response_times.is_empty());
        assert_eq!(manager.load_balancer().weight(&id), 1.0);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_start_prunes_state_of_services_removed_while_stopped() {
        let manager = quiet_manager();
        let id = manager.register_agent_service(ocr_agent("agent-1")).unwrap();
        manager.select_agent(SelectionRequest::new()).unwrap();
        assert!(manager.registry().unregister_service(&id));
        assert_eq!(manager.load_balancer().connection_count(&id), 1);

        manager.start().unwrap();
        assert_eq!(manager.load_balancer().connection_count(&id), 0);
        assert!(manager.load_balancer().stats().service_distributions.is_empty());
        manager.stop().await;
    }

    #[test]
    fn test_lifecycle_events() {
        let manager = quiet_manager();
        assert!(manager.handle_lifecycle_event(AgentLifecycleEvent::Started(ocr_agent("agent-9"))));
        assert!(manager.get_agent_health("agent-9").is_some());

        assert!(manager.handle_lifecycle_event(AgentLifecycleEvent::Stopped {
            agent_id: "agent-9".to_string()
        }));
        assert!(manager.get_agent_health("agent-9").is_none());
    }

    #[test]
    fn test_agent_health() {
        let manager = quiet_manager();
        let id = manager.register_agent_service(ocr_agent("agent-1")).unwrap();

        let health = manager.get_agent_health("agent-1").unwrap();
        assert!(health.healthy);
        assert_eq!(health.services.len(), 1);
        assert_eq!(health.services[0].service_id, id);

        manager
            .registry()
            .update_service_status(&id, ServiceStatus::Unhealthy);
        let health = manager.get_agent_health("agent-1").unwrap();
        assert!(!health.healthy);
        assert_eq!(health.services[0].status, ServiceStatus::Unhealthy);

        assert!(manager.get_agent_health("nobody").is_none());
    }

    #[test]
    fn test_admin_setters() {
        let manager = quiet_manager();
        manager.change_load_balancing_strategy(LoadBalancingStrategy::LeastConnections);
        assert_eq!(
            manager.load_balancer().strategy(),
            LoadBalancingStrategy::LeastConnections
        );
        assert_eq!(manager.set_agent_weight("svc", 42.0), 10.0);
    }

    #[test]
    fn test_comprehensive_stats_serialize() {
        let manager = quiet_manager();
        manager.register_agent_service(ocr_agent("agent-1")).unwrap();
        manager.select_agent(SelectionRequest::new());

        let stats = serde_json::to_value(manager.get_comprehensive_stats()).unwrap();
        assert_eq!(stats["manager"]["state"], "created");
        assert_eq!(stats["registry"]["active_services"], 1);
        assert_eq!(stats["registry"]["agent_count"], 1);
        assert_eq!(stats["health"]["total_checks"], 0);
        assert_eq!(stats["load_balancer"]["strategy"], "round_robin");
        assert_eq!(stats["load_balancer"]["total_requests"], 1);
    }
}
