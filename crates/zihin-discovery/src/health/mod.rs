//! Health Monitoring
//!
//! Periodically probes every registered service with a protocol-appropriate
//! [`HealthChecker`] and writes the outcome back into the registry: a passing
//! probe marks the service `Healthy` and refreshes its heartbeat, a failing or
//! erroring probe marks it `Unhealthy`.
//!
//! Probes within a cycle run concurrently and are individually bounded by a
//! timeout, so one slow or failing service never stalls or aborts the cycle.

mod checkers;
#[cfg(not(feature = "http-health"))]
mod minimal_http;

pub use checkers::{
    HealthChecker, HttpHealthChecker, PING_GRACE, PingHealthChecker, TcpHealthChecker, ping_args,
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::HealthMonitorConfig;
use crate::registry::ServiceRegistry;
use crate::types::{CheckProtocol, ServiceInfo, ServiceStatus};

/// Outcome of one check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Services skipped because they are `Stopping`
    pub skipped: usize,
}

/// Snapshot of health monitor counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthStats {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    /// `successful_checks / total_checks`, 0.0 before the first check
    pub success_rate: f64,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Probes registered services and records their health.
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    config: HealthMonitorConfig,
    checkers: HashMap<CheckProtocol, Arc<dyn HealthChecker>>,
    total_checks: AtomicU64,
    successful_checks: AtomicU64,
    failed_checks: AtomicU64,
    cycles: AtomicU64,
    last_cycle_at: Mutex<Option<DateTime<Utc>>>,
}

impl HealthMonitor {
    /// Create a monitor with the built-in HTTP, TCP and ping checkers.
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthMonitorConfig) -> Self {
        let timeout = config.check_timeout;
        let builtin: [Arc<dyn HealthChecker>; 3] = [
            Arc::new(HttpHealthChecker::new(timeout)),
            Arc::new(TcpHealthChecker::new(timeout)),
            Arc::new(PingHealthChecker::new(timeout)),
        ];

        Self {
            registry,
            config,
            checkers: builtin.into_iter().map(|c| (c.protocol(), c)).collect(),
            total_checks: AtomicU64::new(0),
            successful_checks: AtomicU64::new(0),
            failed_checks: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            last_cycle_at: Mutex::new(None),
        }
    }

    /// Replace the checker for the protocol it reports.
    pub fn with_checker(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        self.set_checker(checker);
        self
    }

    pub fn set_checker(&mut self, checker: Arc<dyn HealthChecker>) {
        self.checkers.insert(checker.protocol(), checker);
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Probe a service without touching the registry.
    pub async fn probe(&self, service: &ServiceInfo) -> bool {
        let protocol = CheckProtocol::for_service(service);
        let Some(checker) = self.checkers.get(&protocol) else {
            warn!(service_id = %service.service_id, protocol = %protocol, "No health checker for protocol");
            return false;
        };

        let deadline = self.config.check_timeout + PING_GRACE;
        match tokio::time::timeout(deadline, checker.check(service)).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                warn!(
                    service_id = %service.service_id,
                    protocol = %protocol,
                    error = %e,
                    error_code = e.error_code(),
                    retryable = e.is_retryable(),
                    "Health check failed"
                );
                false
            }
            Err(_) => {
                warn!(
                    service_id = %service.service_id,
                    protocol = %protocol,
                    timeout_ms = deadline.as_millis() as u64,
                    "Health check timed out"
                );
                false
            }
        }
    }

    fn record(&self, service_id: &str, healthy: bool) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        let status = if healthy {
            self.successful_checks.fetch_add(1, Ordering::Relaxed);
            ServiceStatus::Healthy
        } else {
            self.failed_checks.fetch_add(1, Ordering::Relaxed);
            ServiceStatus::Unhealthy
        };

        if !self.registry.update_service_status(service_id, status) {
            debug!(service_id = %service_id, "Service left the registry during its health check");
        }
    }

    /// Probe one registered service and write the result back.
    ///
    /// Returns `None` if the service is not registered.
    pub async fn check_service(&self, service_id: &str) -> Option<bool> {
        let service = self.registry.get_service(service_id)?;
        let healthy = self.probe(&service).await;
        self.record(service_id, healthy);
        Some(healthy)
    }

    /// Probe every registered service that is not `Stopping`, concurrently.
    pub async fn run_check_cycle(&self) -> CycleReport {
        let (stopping, services): (Vec<ServiceInfo>, Vec<ServiceInfo>) = self
            .registry
            .all_services()
            .into_iter()
            .partition(|s| s.status == ServiceStatus::Stopping);

        let results = join_all(services.iter().map(|s| async move {
            let healthy = self.probe(s).await;
            (s.service_id.as_str(), healthy)
        }))
        .await;

        let mut report = CycleReport {
            skipped: stopping.len(),
            ..Default::default()
        };
        for (service_id, healthy) in results {
            self.record(service_id, healthy);
            report.checked += 1;
            if healthy {
                report.healthy += 1;
            } else {
                report.unhealthy += 1;
            }
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_cycle_at.lock() {
            *last = Some(Utc::now());
        }

        debug!(
            checked = report.checked,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            skipped = report.skipped,
            "Health check cycle complete"
        );
        report
    }

    /// Run a check cycle every `check_interval`, starting immediately.
    ///
    /// Never returns; stop it by aborting the task that drives it.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.check_interval.as_secs(),
            timeout_secs = self.config.check_timeout.as_secs(),
            "Starting health monitor"
        );
        loop {
            interval.tick().await;
            self.run_check_cycle().await;
        }
    }

    pub fn stats(&self) -> HealthStats {
        let total_checks = self.total_checks.load(Ordering::Relaxed);
        let successful_checks = self.successful_checks.load(Ordering::Relaxed);
        HealthStats {
            total_checks,
            successful_checks,
            failed_checks: self.failed_checks.load(Ordering::Relaxed),
            success_rate: if total_checks == 0 {
                0.0
            } else {
                successful_checks as f64 / total_checks as f64
            },
            cycles: self.cycles.load(Ordering::Relaxed),
            last_cycle_at: self.last_cycle_at.lock().ok().and_then(|t| *t),
        }
    }
}
