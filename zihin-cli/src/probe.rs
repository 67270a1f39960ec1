//! `zihin probe`: one-shot health check of a single endpoint

use std::sync::Arc;
use std::time::{Duration, Instant};

use zihin_discovery::{
    CheckProtocol, HealthMonitor, HealthMonitorConfig, ServiceInfo, ServiceRegistry,
};

use crate::CliError;

fn probe_target(host: String, port: u16, protocol: String, url: Option<String>) -> ServiceInfo {
    let service = ServiceInfo::new("cli", "probe", "probe", host, port).with_protocol(protocol);
    match url {
        Some(url) => service.with_health_check_url(url),
        None => service,
    }
}

/// Probe once and print the outcome as JSON. Returns whether it was healthy.
pub async fn run_probe(
    host: String,
    port: u16,
    protocol: String,
    url: Option<String>,
    timeout_secs: u64,
) -> Result<bool, CliError> {
    let timeout = Duration::from_secs(timeout_secs.max(1));
    let config = HealthMonitorConfig {
        check_interval: timeout * 2,
        check_timeout: timeout,
        enable: false,
    };
    let monitor = HealthMonitor::new(Arc::new(ServiceRegistry::default()), config);

    let service = probe_target(host, port, protocol, url);
    let started = Instant::now();
    let healthy = monitor.probe(&service).await;

    let report = serde_json::json!({
        "address": service.address(),
        "check": CheckProtocol::for_service(&service).to_string(),
        "healthy": healthy,
        "elapsed_ms": started.elapsed().as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(healthy)
}
