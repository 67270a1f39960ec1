//! Service Registry
//!
//! Thread-safe store of [`ServiceInfo`] records keyed by service id, with
//! secondary indexes by agent, by service type and by capability.
//!
//! # Invariants
//!
//! - A service present in the primary map appears in exactly its agent
//!   bucket, its type bucket and one bucket per capability.
//! - Removing a service clears all of its index entries, and buckets that
//!   become empty are dropped.
//! - Index maintenance only happens while the state lock is held.
//!
//! The registry never holds its lock across an `.await`; async callers
//! (the health monitor, the cleanup loop) take snapshots and write back one
//! update at a time.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::types::{ServiceInfo, ServiceStatus};

// ============================================================================
// Events
// ============================================================================

/// Events emitted by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A service was registered (or replaced under the same id).
    ServiceRegistered {
        service_id: String,
        agent_id: String,
        service_type: String,
    },
    /// A service left the registry.
    ServiceUnregistered {
        service_id: String,
        agent_id: String,
        reason: DeregistrationReason,
    },
    /// A service changed status.
    StatusChanged {
        service_id: String,
        old_status: ServiceStatus,
        new_status: ServiceStatus,
    },
}

/// Reason for a service leaving the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregistrationReason {
    /// Removed by an explicit unregister call
    Explicit,
    /// Removed by the cleanup pass for failing the health timeout
    Expired,
}

// ============================================================================
// State
// ============================================================================

type Index = HashMap<String, HashSet<String>>;

#[derive(Debug, Default)]
struct RegistryState {
    services: HashMap<String, ServiceInfo>,
    by_agent: Index,
    by_type: Index,
    by_capability: Index,
    total_registrations: u64,
    total_unregistrations: u64,
    expired_removals: u64,
}

impl RegistryState {
    fn service_mut(&mut self, service_id: &str) -> DiscoveryResult<&mut ServiceInfo> {
        self.services
            .get_mut(service_id)
            .ok_or_else(|| DiscoveryError::ServiceNotFound(service_id.to_string()))
    }

    fn add_to_indexes(&mut self, info: &ServiceInfo) {
        let id = &info.service_id;
        self.by_agent
            .entry(info.agent_id.clone())
            .or_default()
            .insert(id.clone());
        self.by_type
            .entry(info.service_type.clone())
            .or_default()
            .insert(id.clone());
        for capability in &info.capabilities {
            self.by_capability
                .entry(capability.clone())
                .or_default()
                .insert(id.clone());
        }
    }

    fn remove_from_indexes(&mut self, info: &ServiceInfo) {
        let id = &info.service_id;
        index_remove(&mut self.by_agent, &info.agent_id, id);
        index_remove(&mut self.by_type, &info.service_type, id);
        for capability in &info.capabilities {
            index_remove(&mut self.by_capability, capability, id);
        }
    }

    fn remove_service(&mut self, service_id: &str) -> Option<ServiceInfo> {
        let info = self.services.remove(service_id)?;
        self.remove_from_indexes(&info);
        Some(info)
    }

    /// Ids matching the indexed filters; `None` filters match everything.
    fn candidate_ids(&self, service_type: Option<&str>, capability: Option<&str>) -> HashSet<String> {
        let mut candidates: Option<HashSet<String>> = None;

        if let Some(service_type) = service_type {
            candidates = Some(self.by_type.get(service_type).cloned().unwrap_or_default());
        }

        if let Some(capability) = capability {
            let by_cap = self.by_capability.get(capability).cloned().unwrap_or_default();
            candidates = Some(match candidates {
                Some(ids) => ids.intersection(&by_cap).cloned().collect(),
                None => by_cap,
            });
        }

        candidates.unwrap_or_else(|| self.services.keys().cloned().collect())
    }
}

fn index_remove(index: &mut Index, key: &str, service_id: &str) {
    if let Some(bucket) = index.get_mut(key) {
        bucket.remove(service_id);
        if bucket.is_empty() {
            index.remove(key);
        }
    }
}

fn index_has_exactly(index: &Index, keys: &HashSet<&str>, service_id: &str) -> bool {
    index
        .iter()
        .all(|(key, ids)| ids.contains(service_id) == keys.contains(key.as_str()))
        && keys.iter().all(|k| index.contains_key(*k))
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of registry counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub active_services: usize,
    pub healthy_services: usize,
    pub total_registrations: u64,
    pub total_unregistrations: u64,
    pub expired_removals: u64,
    pub services_by_type: BTreeMap<String, usize>,
    pub service_types: usize,
    pub agent_count: usize,
    pub capability_count: usize,
}

// ============================================================================
// Registry
// ============================================================================

/// In-memory service registry.
pub struct ServiceRegistry {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ServiceRegistry {
    /// Create a new registry.
    pub fn new(config: RegistryConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            state: Mutex::new(RegistryState::default()),
            event_tx,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Heartbeat age after which a healthy service stops counting as healthy.
    pub fn health_timeout(&self) -> Duration {
        self.config.health_timeout
    }

    /// Subscribe to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: RegistryEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.event_tx.send(event);
    }

    fn lock(&self) -> DiscoveryResult<MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|e| DiscoveryError::LockPoisoned(format!("service registry: {e}")))
    }

    /// Register a service, replacing any entry with the same id.
    ///
    /// Returns the id under which the service was stored (generated if the
    /// record carried none).
    pub fn register(&self, mut info: ServiceInfo) -> DiscoveryResult<String> {
        let service_id = info.ensure_id().to_string();
        let now = Utc::now();
        info.registration_time = now;
        info.last_heartbeat = now;
        if info.status == ServiceStatus::Unknown {
            info.status = ServiceStatus::Starting;
        }

        let agent_id = info.agent_id.clone();
        let service_type = info.service_type.clone();

        {
            let mut state = self.lock()?;
            if state.remove_service(&service_id).is_some() {
                debug!(service_id = %service_id, "Replacing existing service registration");
            }
            state.add_to_indexes(&info);
            state.services.insert(service_id.clone(), info);
            state.total_registrations += 1;
        }

        info!(
            service_id = %service_id,
            agent_id = %agent_id,
            service_type = %service_type,
            "Registered service"
        );

        self.emit_event(RegistryEvent::ServiceRegistered {
            service_id: service_id.clone(),
            agent_id,
            service_type,
        });

        Ok(service_id)
    }

    /// Register a service; internal failures are logged and reported as `false`.
    pub fn register_service(&self, info: ServiceInfo) -> bool {
        match self.register(info) {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to register service");
                false
            }
        }
    }

    /// Remove a service. Returns `false` if it was not registered.
    pub fn unregister_service(&self, service_id: &str) -> bool {
        let removed = match self.lock() {
            Ok(mut state) => {
                let removed = state.remove_service(service_id);
                if removed.is_some() {
                    state.total_unregistrations += 1;
                }
                removed
            }
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Failed to unregister service");
                return false;
            }
        };

        match removed {
            Some(info) => {
                info!(
                    service_id = %service_id,
                    agent_id = %info.agent_id,
                    "Unregistered service"
                );
                self.emit_event(RegistryEvent::ServiceUnregistered {
                    service_id: service_id.to_string(),
                    agent_id: info.agent_id,
                    reason: DeregistrationReason::Explicit,
                });
                true
            }
            None => false,
        }
    }

    /// Query services.
    ///
    /// Type and capability filters intersect through the indexes; every
    /// requested tag must be present. With `healthy_only` the registry's
    /// health timeout applies. Results are ordered by most recent heartbeat
    /// first, then by id.
    pub fn discover_services(
        &self,
        service_type: Option<&str>,
        capability: Option<&str>,
        tags: Option<&[String]>,
        healthy_only: bool,
    ) -> Vec<ServiceInfo> {
        let state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Service discovery failed");
                return Vec::new();
            }
        };

        let timeout = self.config.health_timeout;
        let mut results: Vec<ServiceInfo> = state
            .candidate_ids(service_type, capability)
            .iter()
            .filter_map(|id| state.services.get(id))
            .filter(|s| !healthy_only || s.is_healthy(timeout))
            .filter(|s| tags.is_none_or(|tags| s.has_tags(tags)))
            .cloned()
            .collect();
        drop(state);

        results.sort_by(|a, b| {
            b.last_heartbeat
                .cmp(&a.last_heartbeat)
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        results
    }

    /// Get a snapshot of one service.
    pub fn get_service(&self, service_id: &str) -> Option<ServiceInfo> {
        match self.lock() {
            Ok(state) => state.services.get(service_id).cloned(),
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Service lookup failed");
                None
            }
        }
    }

    /// Set a service's status and refresh its heartbeat.
    pub fn update_service_status(&self, service_id: &str, status: ServiceStatus) -> bool {
        let updated = self.lock().and_then(|mut state| {
            let info = state.service_mut(service_id)?;
            let old = info.status;
            info.status = status;
            info.update_heartbeat();
            Ok(old)
        });
        let old_status = match updated {
            Ok(old) => old,
            Err(e @ DiscoveryError::ServiceNotFound(_)) => {
                debug!(error = %e, "Status update ignored");
                return false;
            }
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Status update failed");
                return false;
            }
        };

        if old_status != status {
            info!(
                service_id = %service_id,
                old_status = %old_status,
                new_status = %status,
                "Service status changed"
            );
            self.emit_event(RegistryEvent::StatusChanged {
                service_id: service_id.to_string(),
                old_status,
                new_status: status,
            });
        }
        true
    }

    /// Refresh a service's heartbeat.
    pub fn heartbeat(&self, service_id: &str) -> bool {
        let touched = self.lock().and_then(|mut state| {
            state.service_mut(service_id)?.update_heartbeat();
            Ok(())
        });
        match touched {
            Ok(()) => {
                debug!(service_id = %service_id, "Heartbeat received");
                true
            }
            Err(e @ DiscoveryError::ServiceNotFound(_)) => {
                debug!(error = %e, "Heartbeat ignored");
                false
            }
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Heartbeat failed");
                false
            }
        }
    }

    /// All services owned by an agent.
    pub fn services_for_agent(&self, agent_id: &str) -> Vec<ServiceInfo> {
        match self.lock() {
            Ok(state) => state
                .by_agent
                .get(agent_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.services.get(id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                error!(agent_id = %agent_id, error = %e, "Agent lookup failed");
                Vec::new()
            }
        }
    }

    /// Snapshot of every registered service regardless of health.
    pub fn all_services(&self) -> Vec<ServiceInfo> {
        match self.lock() {
            Ok(state) => state.services.values().cloned().collect(),
            Err(e) => {
                error!(error = %e, "Failed to snapshot services");
                Vec::new()
            }
        }
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        self.lock().map(|s| s.services.len()).unwrap_or(0)
    }

    /// Distinct service types currently indexed.
    pub fn service_types(&self) -> Vec<String> {
        self.lock()
            .map(|s| s.by_type.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Distinct agent ids currently indexed.
    pub fn agent_ids(&self) -> Vec<String> {
        self.lock()
            .map(|s| s.by_agent.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Distinct capabilities currently indexed.
    pub fn capabilities(&self) -> Vec<String> {
        self.lock()
            .map(|s| s.by_capability.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every service that fails [`ServiceInfo::is_healthy`].
    ///
    /// Returns the removed ids.
    pub fn cleanup_stale(&self) -> Vec<String> {
        let timeout = self.config.health_timeout;
        let removed: Vec<ServiceInfo> = match self.lock() {
            Ok(mut state) => {
                let stale: Vec<String> = state
                    .services
                    .values()
                    .filter(|s| !s.is_healthy(timeout))
                    .map(|s| s.service_id.clone())
                    .collect();
                let removed: Vec<ServiceInfo> = stale
                    .iter()
                    .filter_map(|id| state.remove_service(id))
                    .collect();
                state.expired_removals += removed.len() as u64;
                removed
            }
            Err(e) => {
                error!(error = %e, "Cleanup pass failed");
                return Vec::new();
            }
        };

        for info in &removed {
            warn!(
                service_id = %info.service_id,
                agent_id = %info.agent_id,
                status = %info.status,
                heartbeat_age_secs = info.heartbeat_age().as_secs(),
                "Removed stale service"
            );
            self.emit_event(RegistryEvent::ServiceUnregistered {
                service_id: info.service_id.clone(),
                agent_id: info.agent_id.clone(),
                reason: DeregistrationReason::Expired,
            });
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "Cleanup pass removed stale services");
        }

        removed.into_iter().map(|s| s.service_id).collect()
    }

    /// Run [`cleanup_stale`](Self::cleanup_stale) every `cleanup_interval`.
    ///
    /// Never returns; stop it by aborting the task that drives it.
    pub async fn run_cleanup_loop(self: Arc<Self>) {
        let period = self.config.cleanup_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), "Starting registry cleanup loop");
        loop {
            interval.tick().await;
            self.cleanup_stale();
        }
    }

    /// Counters and index sizes.
    pub fn stats(&self) -> RegistryStats {
        let timeout = self.config.health_timeout;
        match self.lock() {
            Ok(state) => RegistryStats {
                active_services: state.services.len(),
                healthy_services: state
                    .services
                    .values()
                    .filter(|s| s.is_healthy(timeout))
                    .count(),
                total_registrations: state.total_registrations,
                total_unregistrations: state.total_unregistrations,
                expired_removals: state.expired_removals,
                services_by_type: state
                    .by_type
                    .iter()
                    .map(|(t, ids)| (t.clone(), ids.len()))
                    .collect(),
                service_types: state.by_type.len(),
                agent_count: state.by_agent.len(),
                capability_count: state.by_capability.len(),
            },
            Err(e) => {
                error!(error = %e, "Failed to collect registry stats");
                RegistryStats::default()
            }
        }
    }

    /// Check the index invariants against the primary map.
    pub fn verify_indexes(&self) -> bool {
        let Ok(state) = self.lock() else {
            return false;
        };

        let no_empty_buckets = [&state.by_agent, &state.by_type, &state.by_capability]
            .iter()
            .all(|index| index.values().all(|ids| !ids.is_empty()));

        let no_dangling = [&state.by_agent, &state.by_type, &state.by_capability]
            .iter()
            .all(|index| {
                index
                    .values()
                    .flatten()
                    .all(|id| state.services.contains_key(id))
            });

        let exact = state.services.values().all(|info| {
            let id = info.service_id.as_str();
            let agent: HashSet<&str> = [info.agent_id.as_str()].into();
            let kind: HashSet<&str> = [info.service_type.as_str()].into();
            let caps: HashSet<&str> = info.capabilities.iter().map(String::as_str).collect();
            index_has_exactly(&state.by_agent, &agent, id)
                && index_has_exactly(&state.by_type, &kind, id)
                && index_has_exactly(&state.by_capability, &caps, id)
        });

        no_empty_buckets && no_dangling && exact
    }

    #[cfg(test)]
    fn backdate_heartbeat(&self, service_id: &str, age: chrono::Duration) {
        let mut state = self.lock().unwrap();
        if let Some(info) = state.services.get_mut(service_id) {
            info.last_heartbeat = Utc::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocr_service() -> ServiceInfo {
        ServiceInfo::new("agent-1", "ocr", "agent", "localhost", 9000)
            .with_capability("ocr")
            .with_tag("vision")
    }

    #[test]
    fn test_register_assigns_id_and_starting_status() {
        let registry = ServiceRegistry::default();
        let id = registry.register(ocr_service()).unwrap();
        assert!(!id.is_empty());

        let stored = registry.get_service(&id).unwrap();
        assert_eq!(stored.status, ServiceStatus::Starting);
        assert_eq!(registry.service_count(), 1);
        assert!(registry.verify_indexes());
    }

    #[test]
    fn test_register_keeps_explicit_status() {
        let registry = ServiceRegistry::default();
        let id = registry
            .register(ocr_service().with_status(ServiceStatus::Healthy))
            .unwrap();
        assert_eq!(
            registry.get_service(&id).unwrap().status,
            ServiceStatus::Healthy
        );
    }

    #[test]
    fn test_reregistration_replaces_entry_and_indexes() {
        let registry = ServiceRegistry::default();
        let id = registry.register(ocr_service().with_id("svc-1")).unwrap();

        let replacement = ServiceInfo::new("agent-2", "ocr", "worker", "localhost", 9001)
            .with_id("svc-1")
            .with_capability("translate");
        assert!(registry.register_service(replacement));

        assert_eq!(registry.service_count(), 1);
        let stored = registry.get_service(&id).unwrap();
        assert_eq!(stored.agent_id, "agent-2");
        assert_eq!(registry.agent_ids(), vec!["agent-2".to_string()]);
        assert_eq!(registry.service_types(), vec!["worker".to_string()]);
        assert_eq!(registry.capabilities(), vec!["translate".to_string()]);
        assert!(registry.verify_indexes());
        assert_eq!(registry.stats().total_registrations, 2);
    }

    #[test]
    fn test_unregister_prunes_indexes() {
        let registry = ServiceRegistry::default();
        let before = registry.stats();
        let id = registry.register(ocr_service()).unwrap();

        assert!(registry.unregister_service(&id));
        assert!(!registry.unregister_service(&id));

        let after = registry.stats();
        assert_eq!(after.active_services, before.active_services);
        assert_eq!(after.agent_count, 0);
        assert_eq!(after.service_types, 0);
        assert_eq!(after.capability_count, 0);
        assert!(registry.verify_indexes());
    }

    #[test]
    fn test_discover_by_type_and_capability() {
        let registry = ServiceRegistry::default();
        let id = registry.register(ocr_service()).unwrap();

        // Starting services are not healthy yet
        assert!(
            registry
                .discover_services(Some("agent"), Some("ocr"), None, true)
                .is_empty()
        );

        assert!(registry.update_service_status(&id, ServiceStatus::Healthy));
        let found = registry.discover_services(Some("agent"), Some("ocr"), None, true);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, id);

        assert!(
            registry
                .discover_services(Some("agent"), Some("speech"), None, true)
                .is_empty()
        );
        assert!(
            registry
                .discover_services(Some("worker"), Some("ocr"), None, false)
                .is_empty()
        );
    }

    #[test]
    fn test_discover_requires_all_tags() {
        let registry = ServiceRegistry::default();
        registry
            .register(
                ocr_service()
                    .with_tag("gpu")
                    .with_status(ServiceStatus::Healthy),
            )
            .unwrap();

        let both = vec!["vision".to_string(), "gpu".to_string()];
        let missing = vec!["vision".to_string(), "edge".to_string()];
        assert_eq!(
            registry.discover_services(None, None, Some(&both), true).len(),
            1
        );
        assert!(
            registry
                .discover_services(None, None, Some(&missing), true)
                .is_empty()
        );
    }

    #[test]
    fn test_discover_orders_by_latest_heartbeat() {
        let registry = ServiceRegistry::default();
        let older = registry
            .register(ocr_service().with_status(ServiceStatus::Healthy))
            .unwrap();
        let newer = registry
            .register(ocr_service().with_status(ServiceStatus::Healthy))
            .unwrap();
        registry.backdate_heartbeat(&older, chrono::Duration::seconds(10));
        registry.backdate_heartbeat(&newer, chrono::Duration::seconds(1));

        let found = registry.discover_services(Some("agent"), None, None, true);
        let ids: Vec<_> = found.iter().map(|s| s.service_id.as_str()).collect();
        assert_eq!(ids, vec![newer.as_str(), older.as_str()]);
    }

    #[test]
    fn test_stale_service_excluded_then_cleaned_up() {
        let registry = ServiceRegistry::default();
        let id = registry
            .register(ocr_service().with_status(ServiceStatus::Healthy))
            .unwrap();
        let fresh = registry
            .register(ocr_service().with_status(ServiceStatus::Healthy))
            .unwrap();

        registry.backdate_heartbeat(&id, chrono::Duration::seconds(61));

        let found = registry.discover_services(Some("agent"), None, None, true);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, fresh);

        // Still registered until cleanup runs
        assert!(registry.get_service(&id).is_some());

        let removed = registry.cleanup_stale();
        assert_eq!(removed, vec![id.clone()]);
        assert!(registry.get_service(&id).is_none());
        assert_eq!(registry.stats().expired_removals, 1);
        assert!(registry.verify_indexes());
    }

    #[test]
    fn test_heartbeat_and_status_on_missing_service() {
        let registry = ServiceRegistry::default();
        assert!(!registry.heartbeat("missing"));
        assert!(!registry.update_service_status("missing", ServiceStatus::Healthy));
        assert!(registry.get_service("missing").is_none());

        let mut state = registry.lock().unwrap();
        let err = state.service_mut("missing").unwrap_err();
        assert_eq!(err.error_code(), "SERVICE_NOT_FOUND");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_services_for_agent() {
        let registry = ServiceRegistry::default();
        registry.register(ocr_service()).unwrap();
        registry.register(ocr_service()).unwrap();
        registry
            .register(ServiceInfo::new("agent-2", "x", "agent", "localhost", 1))
            .unwrap();

        assert_eq!(registry.services_for_agent("agent-1").len(), 2);
        assert_eq!(registry.services_for_agent("agent-2").len(), 1);
        assert!(registry.services_for_agent("agent-3").is_empty());
    }

    #[tokio::test]
    async fn test_events() {
        let registry = ServiceRegistry::default();
        let mut rx = registry.subscribe();

        let id = registry.register(ocr_service()).unwrap();
        match rx.try_recv().unwrap() {
            RegistryEvent::ServiceRegistered { service_id, agent_id, .. } => {
                assert_eq!(service_id, id);
                assert_eq!(agent_id, "agent-1");
            }
            other => panic!("Expected ServiceRegistered, got {other:?}"),
        }

        registry.update_service_status(&id, ServiceStatus::Healthy);
        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryEvent::StatusChanged {
                service_id: id.clone(),
                old_status: ServiceStatus::Starting,
                new_status: ServiceStatus::Healthy,
            }
        );

        registry.unregister_service(&id);
        match rx.try_recv().unwrap() {
            RegistryEvent::ServiceUnregistered { reason, .. } => {
                assert_eq!(reason, DeregistrationReason::Explicit);
            }
            other => panic!("Expected ServiceUnregistered, got {other:?}"),
        }
    }
}
