//! Load Balancer
//!
//! Picks one service out of the healthy candidates the registry returns for
//! a request, and keeps the feedback state that the strategies read:
//! connection counts, response time history and manual weights.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LoadBalancerConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::registry::{RegistryEvent, ServiceRegistry};
use crate::types::ServiceInfo;

/// Lower bound for a manual service weight.
pub const MIN_WEIGHT: f64 = 0.1;
/// Upper bound for a manual service weight.
pub const MAX_WEIGHT: f64 = 10.0;
/// Weight of services that were never given one.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Rotate through candidates per request group
    #[default]
    RoundRobin,
    /// Fewest tracked connections, first candidate on ties
    LeastConnections,
    /// Round robin over candidates replicated by weight
    WeightedRoundRobin,
    /// Uniform random choice
    Random,
    /// Most recent heartbeat
    HealthBased,
    /// Lowest recent average response time
    ResponseTime,
}

impl LoadBalancingStrategy {
    /// Get strategy as string
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancingStrategy::RoundRobin => "round_robin",
            LoadBalancingStrategy::LeastConnections => "least_connections",
            LoadBalancingStrategy::WeightedRoundRobin => "weighted_round_robin",
            LoadBalancingStrategy::Random => "random",
            LoadBalancingStrategy::HealthBased => "health_based",
            LoadBalancingStrategy::ResponseTime => "response_time",
        }
    }

    /// All strategies, in declaration order.
    pub fn all() -> [LoadBalancingStrategy; 6] {
        [
            LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategy::LeastConnections,
            LoadBalancingStrategy::WeightedRoundRobin,
            LoadBalancingStrategy::Random,
            LoadBalancingStrategy::HealthBased,
            LoadBalancingStrategy::ResponseTime,
        ]
    }
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        LoadBalancingStrategy::all()
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| DiscoveryError::InvalidStrategy(s.to_string()))
    }
}

/// Filters for one selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub service_type: Option<String>,
    pub capability: Option<String>,
    pub tags: Vec<String>,
    pub exclude: HashSet<String>,
}

impl SelectionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a service type.
    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    /// Restrict to services with a capability.
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    /// Require a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Never return this service.
    pub fn exclude(mut self, service_id: impl Into<String>) -> Self {
        self.exclude.insert(service_id.into());
        self
    }

    /// Round robin counters are kept per key: `type|capability|tag,tag`.
    pub fn group_key(&self) -> String {
        let mut tags = self.tags.clone();
        tags.sort();
        tags.dedup();
        format!(
            "{}|{}|{}",
            self.service_type.as_deref().unwrap_or_default(),
            self.capability.as_deref().unwrap_or_default(),
            tags.join(",")
        )
    }
}

/// Snapshot of load balancer counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadBalancerStats {
    pub strategy: LoadBalancingStrategy,
    pub total_requests: u64,
    pub successful_distributions: u64,
    /// Selections aborted by an internal error
    pub failed_distributions: u64,
    /// Requests whose candidate pool was empty
    pub no_candidate_requests: u64,
    pub service_distributions: BTreeMap<String, u64>,
    pub active_connections: BTreeMap<String, u64>,
    /// Recent average response time per service, in seconds
    pub average_response_times: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
struct BalancerState {
    strategy: LoadBalancingStrategy,
    counters: HashMap<String, usize>,
    connections: HashMap<String, u64>,
    response_times: HashMap<String, VecDeque<Duration>>,
    weights: HashMap<String, f64>,
    distributions: HashMap<String, u64>,
}

impl BalancerState {
    fn next_in_rotation(&mut self, key: &str, len: usize) -> usize {
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        let index = *counter % len;
        *counter = counter.wrapping_add(1);
        index
    }

    fn weight(&self, service_id: &str) -> f64 {
        self.weights
            .get(service_id)
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// Unknown services average to zero and win ties against measured ones.
    fn average_response_time(&self, service_id: &str, window: usize) -> Duration {
        let Some(history) = self.response_times.get(service_id) else {
            return Duration::ZERO;
        };
        let (total, count) = history
            .iter()
            .rev()
            .take(window)
            .fold((Duration::ZERO, 0u32), |(total, count), sample| {
                (total.saturating_add(*sample), count.saturating_add(1))
            });
        if count == 0 {
            return Duration::ZERO;
        }
        total / count
    }

    fn forget(&mut self, service_id: &str) {
        self.connections.remove(service_id);
        self.response_times.remove(service_id);
        self.weights.remove(service_id);
        self.distributions.remove(service_id);
    }

    fn pick(&mut self, key: &str, candidates: &[ServiceInfo], window: usize) -> usize {
        match self.strategy {
            LoadBalancingStrategy::RoundRobin => self.next_in_rotation(key, candidates.len()),
            LoadBalancingStrategy::LeastConnections => candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| self.connections.get(&s.service_id).copied().unwrap_or(0))
                .map(|(i, _)| i)
                .unwrap_or(0),
            LoadBalancingStrategy::WeightedRoundRobin => {
                let expanded: Vec<usize> = candidates
                    .iter()
                    .enumerate()
                    .flat_map(|(i, s)| {
                        let copies = (self.weight(&s.service_id).round() as usize).max(1);
                        std::iter::repeat_n(i, copies)
                    })
                    .collect();
                let slot = self.next_in_rotation(key, expanded.len());
                expanded[slot]
            }
            LoadBalancingStrategy::Random => rand::rng().random_range(0..candidates.len()),
            LoadBalancingStrategy::HealthBased => candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| std::cmp::Reverse(s.last_heartbeat))
                .map(|(i, _)| i)
                .unwrap_or(0),
            LoadBalancingStrategy::ResponseTime => candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| self.average_response_time(&s.service_id, window))
                .map(|(i, _)| i)
                .unwrap_or(0),
        }
    }
}

/// Strategy-driven service selector over a shared registry.
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    config: LoadBalancerConfig,
    state: Mutex<BalancerState>,
    total_requests: AtomicU64,
    successful_distributions: AtomicU64,
    failed_distributions: AtomicU64,
    no_candidate_requests: AtomicU64,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, config: LoadBalancerConfig) -> Self {
        let state = BalancerState {
            strategy: config.strategy,
            ..Default::default()
        };
        Self {
            registry,
            config,
            state: Mutex::new(state),
            total_requests: AtomicU64::new(0),
            successful_distributions: AtomicU64::new(0),
            failed_distributions: AtomicU64::new(0),
            no_candidate_requests: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> DiscoveryResult<MutexGuard<'_, BalancerState>> {
        self.state
            .lock()
            .map_err(|e| DiscoveryError::LockPoisoned(format!("load balancer: {e}")))
    }

    /// Select one healthy service matching the request.
    ///
    /// Candidates are ordered by service id so rotations stay stable while
    /// heartbeats move. The chosen service's connection count goes up by
    /// one; pair every successful selection with
    /// [`release_service`](Self::release_service).
    #[instrument(skip(self, request), fields(key = %request.group_key()))]
    pub fn select_service(&self, request: &SelectionRequest) -> Option<ServiceInfo> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let tags = (!request.tags.is_empty()).then_some(request.tags.as_slice());
        let mut candidates: Vec<ServiceInfo> = self
            .registry
            .discover_services(
                request.service_type.as_deref(),
                request.capability.as_deref(),
                tags,
                true,
            )
            .into_iter()
            .filter(|s| !request.exclude.contains(&s.service_id))
            .collect();

        if candidates.is_empty() {
            self.no_candidate_requests.fetch_add(1, Ordering::Relaxed);
            debug!("No healthy candidates");
            return None;
        }
        candidates.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        match self.choose(&request.group_key(), candidates) {
            Ok(selected) => {
                self.successful_distributions.fetch_add(1, Ordering::Relaxed);
                Some(selected)
            }
            Err(e) => {
                self.failed_distributions.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Service selection failed");
                None
            }
        }
    }

    fn choose(&self, key: &str, mut candidates: Vec<ServiceInfo>) -> DiscoveryResult<ServiceInfo> {
        let mut state = self.lock()?;
        let strategy = state.strategy;
        let index = state.pick(key, &candidates, self.config.response_time_window);
        let selected = candidates.swap_remove(index);

        *state
            .connections
            .entry(selected.service_id.clone())
            .or_insert(0) += 1;
        *state
            .distributions
            .entry(selected.service_id.clone())
            .or_insert(0) += 1;
        drop(state);

        debug!(
            service_id = %selected.service_id,
            strategy = %strategy,
            "Selected service"
        );
        Ok(selected)
    }

    /// Drop one tracked connection, never going below zero.
    ///
    /// Returns `false` if the service has no tracked connections at all.
    pub fn release_service(&self, service_id: &str) -> bool {
        match self.lock() {
            Ok(mut state) => match state.connections.get_mut(service_id) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    true
                }
                None => false,
            },
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Release failed");
                false
            }
        }
    }

    /// Append a response time sample, keeping the newest `history_size`.
    ///
    /// Samples for services the registry does not know are dropped.
    pub fn record_response_time(&self, service_id: &str, response_time: Duration) {
        if self.registry.get_service(service_id).is_none() {
            debug!(service_id = %service_id, "Response time for unknown service ignored");
            return;
        }
        let history_size = self.config.history_size.max(1);
        match self.lock() {
            Ok(mut state) => {
                let history = state
                    .response_times
                    .entry(service_id.to_string())
                    .or_default();
                history.push_back(response_time);
                while history.len() > history_size {
                    history.pop_front();
                }
            }
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Failed to record response time");
            }
        }
    }

    /// Set a service weight, clamped to `[MIN_WEIGHT, MAX_WEIGHT]`.
    ///
    /// Returns the weight actually stored. NaN resets to the default.
    pub fn set_service_weight(&self, service_id: &str, weight: f64) -> f64 {
        let weight = if weight.is_nan() {
            DEFAULT_WEIGHT
        } else {
            weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
        };
        match self.lock() {
            Ok(mut state) => {
                state.weights.insert(service_id.to_string(), weight);
                debug!(service_id = %service_id, weight, "Service weight set");
            }
            Err(e) => {
                error!(service_id = %service_id, error = %e, "Failed to set weight");
            }
        }
        weight
    }

    /// Switch strategy for subsequent selections.
    pub fn change_strategy(&self, strategy: LoadBalancingStrategy) {
        match self.lock() {
            Ok(mut state) => {
                let old = std::mem::replace(&mut state.strategy, strategy);
                info!(old_strategy = %old, new_strategy = %strategy, "Load balancing strategy changed");
            }
            Err(e) => error!(error = %e, "Failed to change strategy"),
        }
    }

    /// Current strategy.
    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.lock()
            .map(|s| s.strategy)
            .unwrap_or(self.config.strategy)
    }

    pub fn connection_count(&self, service_id: &str) -> u64 {
        self.lock()
            .ok()
            .and_then(|s| s.connections.get(service_id).copied())
            .unwrap_or(0)
    }

    /// Average over the configured window, `None` without samples.
    pub fn average_response_time(&self, service_id: &str) -> Option<Duration> {
        let state = self.lock().ok()?;
        state
            .response_times
            .get(service_id)
            .filter(|h| !h.is_empty())
            .map(|_| state.average_response_time(service_id, self.config.response_time_window))
    }

    pub fn weight(&self, service_id: &str) -> f64 {
        self.lock()
            .map(|s| s.weight(service_id))
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// Drop all feedback state kept for a service.
    pub fn forget_service(&self, service_id: &str) {
        match self.lock() {
            Ok(mut state) => state.forget(service_id),
            Err(e) => error!(service_id = %service_id, error = %e, "Failed to forget service"),
        }
    }

    /// Drop feedback state for every service no longer in the registry.
    ///
    /// Returns the number of services forgotten.
    pub fn prune_unregistered(&self) -> usize {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Failed to prune load balancer state");
                return 0;
            }
        };

        let mut tracked: HashSet<String> = state.connections.keys().cloned().collect();
        tracked.extend(state.response_times.keys().cloned());
        tracked.extend(state.weights.keys().cloned());
        tracked.extend(state.distributions.keys().cloned());

        let mut pruned = 0;
        for service_id in tracked {
            if self.registry.get_service(&service_id).is_none() {
                state.forget(&service_id);
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, "Pruned load balancer state");
        }
        pruned
    }

    /// Forget services as the registry reports them gone.
    ///
    /// Falls back to a full prune when the event stream lags.
    pub async fn run_eviction_loop(self: Arc<Self>, mut events: broadcast::Receiver<RegistryEvent>) {
        loop {
            match events.recv().await {
                Ok(RegistryEvent::ServiceUnregistered { service_id, .. }) => {
                    self.forget_service(&service_id);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Registry events lagged; pruning load balancer state");
                    self.prune_unregistered();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub fn stats(&self) -> LoadBalancerStats {
        let mut stats = LoadBalancerStats {
            strategy: self.config.strategy,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_distributions: self.successful_distributions.load(Ordering::Relaxed),
            failed_distributions: self.failed_distributions.load(Ordering::Relaxed),
            no_candidate_requests: self.no_candidate_requests.load(Ordering::Relaxed),
            ..Default::default()
        };

        match self.lock() {
            Ok(state) => {
                stats.strategy = state.strategy;
                stats.service_distributions = state
                    .distributions
                    .iter()
                    .map(|(id, n)| (id.clone(), *n))
                    .collect();
                stats.active_connections = state
                    .connections
                    .iter()
                    .filter(|(_, n)| **n > 0)
                    .map(|(id, n)| (id.clone(), *n))
                    .collect();
                stats.average_response_times = state
                    .response_times
                    .iter()
                    .filter(|(_, h)| !h.is_empty())
                    .map(|(id, _)| {
                        let avg = state.average_response_time(id, self.config.response_time_window);
                        (id.clone(), avg.as_secs_f64())
                    })
                    .collect();
            }
            Err(e) => error!(error = %e, "Failed to collect load balancer stats"),
        }

        stats
    }
}
