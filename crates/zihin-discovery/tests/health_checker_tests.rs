//! Integration tests for the built-in health checkers
//!
//! Each test spins up an in-process TCP server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use zihin_discovery::{
    HealthChecker, HealthMonitor, HealthMonitorConfig, HttpHealthChecker, ServiceInfo,
    ServiceRegistry, ServiceStatus, TcpHealthChecker,
};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Serve `response` to every connection until the test ends.
async fn http_server(response: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    port
}

/// A port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn service(port: u16) -> ServiceInfo {
    ServiceInfo::new("agent-1", "svc", "agent", "127.0.0.1", port)
}

#[tokio::test]
async fn test_http_checker_accepts_200() {
    let port = http_server("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;
    let checker = HttpHealthChecker::new(TIMEOUT);

    assert!(checker.check(&service(port)).await.unwrap());
}

#[tokio::test]
async fn test_http_checker_rejects_non_200() {
    let port = http_server(
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    let checker = HttpHealthChecker::new(TIMEOUT);

    assert!(!checker.check(&service(port)).await.unwrap());
}

#[tokio::test]
async fn test_http_checker_uses_explicit_url() {
    let port = http_server("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
    let checker = HttpHealthChecker::new(TIMEOUT);

    // The service port is closed; only the explicit URL is reachable
    let svc = service(closed_port().await)
        .with_health_check_url(format!("http://127.0.0.1:{port}/ready"));
    assert!(checker.check(&svc).await.unwrap());
}

#[tokio::test]
async fn test_http_checker_connection_refused_is_error() {
    let checker = HttpHealthChecker::new(TIMEOUT);
    let result = checker.check(&service(closed_port().await)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_tcp_checker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let checker = TcpHealthChecker::new(TIMEOUT);

    assert!(checker.check(&service(port)).await.unwrap());

    drop(listener);
    let err = checker.check(&service(port)).await.unwrap_err();
    assert_eq!(err.error_code(), "IO_ERROR");
}

#[tokio::test]
async fn test_monitor_with_real_checkers() {
    let http_port =
        http_server("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
    let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_port = tcp_listener.local_addr().unwrap().port();
    let dead_port = closed_port().await;

    let registry = Arc::new(ServiceRegistry::default());
    registry
        .register(service(http_port).with_id("web"))
        .unwrap();
    registry
        .register(service(tcp_port).with_id("db").with_protocol("tcp"))
        .unwrap();
    registry
        .register(service(dead_port).with_id("dead").with_protocol("tcp"))
        .unwrap();

    let config = HealthMonitorConfig {
        check_timeout: TIMEOUT,
        ..Default::default()
    };
    let monitor = HealthMonitor::new(registry.clone(), config);
    let report = monitor.run_check_cycle().await;

    assert_eq!(report.checked, 3);
    assert_eq!(report.healthy, 2);
    assert_eq!(registry.get_service("web").unwrap().status, ServiceStatus::Healthy);
    assert_eq!(registry.get_service("db").unwrap().status, ServiceStatus::Healthy);
    assert_eq!(registry.get_service("dead").unwrap().status, ServiceStatus::Unhealthy);

    let healthy = registry.discover_services(Some("agent"), None, None, true);
    assert_eq!(healthy.len(), 2);
}
