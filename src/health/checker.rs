// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::Backend;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Runs one probe loop per backend. Loops are independent of each other and
/// of request traffic; they only ever call `mark_healthy`/`mark_unhealthy`.
pub struct HealthMonitor {
    config: HealthCheckConfig,
    backends: Vec<Arc<Backend>>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct ProbeResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthCheckConfig,
        backends: Vec<Arc<Backend>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create health check client")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            backends,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Spawn a probe loop for every backend.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            interval = ?self.config.interval(),
            timeout = ?self.config.timeout(),
            path = %self.config.path,
            "Starting health monitor for {} backends",
            self.backends.len()
        );

        self.backends
            .iter()
            .cloned()
            .map(|backend| {
                let monitor = self.clone();
                tokio::spawn(async move { monitor.run(backend).await })
            })
            .collect()
    }

    /// Stop every probe loop after its current probe.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn run(&self, backend: Arc<Backend>) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = sleep(self.config.interval()) => {}
                _ = shutdown_rx.changed() => continue,
            }

            let result = self.probe(&backend).await;
            debug!(
                backend = %result.backend_id,
                healthy = result.healthy,
                response_time_ms = result.response_time_ms,
                "probe finished"
            );
        }

        debug!(backend = %backend.id, "health probe loop stopped");
    }

    /// Probe one backend once and update its health flag.
    pub async fn probe(&self, backend: &Backend) -> ProbeResult {
        let start = std::time::Instant::now();
        let url = backend.endpoint(&self.config.path);

        let result = timeout(self.config.timeout(), self.client.get(url.as_str()).send()).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let error = match result {
            Ok(Ok(response)) if response.status() == StatusCode::OK => None,
            Ok(Ok(response)) => Some(format!("HTTP {}", response.status())),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("probe timed out".to_string()),
        };
        let healthy = error.is_none();

        let was_healthy = if healthy {
            backend.mark_healthy()
        } else {
            backend.mark_unhealthy()
        };

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, healthy);
            metrics.update_backend_connections(&backend.id, backend.active_connections());
            let healthy_count = self.backends.iter().filter(|b| b.is_healthy()).count();
            metrics.update_healthy_backends(healthy_count);
        }

        match (was_healthy, healthy) {
            (false, true) => info!(backend = %backend.id, "backend is healthy again"),
            (true, false) => warn!(
                backend = %backend.id,
                error = error.as_deref().unwrap_or_default(),
                "backend failed health check"
            ),
            _ => {}
        }

        ProbeResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time_ms,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(timeout_secs: u64) -> HealthCheckConfig {
        HealthCheckConfig {
            interval_secs: 1,
            timeout_secs,
            path: "/health".to_string(),
        }
    }

    fn monitor_for(url: &str) -> (Arc<HealthMonitor>, Arc<Backend>) {
        let backend = Arc::new(Backend::new(url.parse().unwrap()));
        let monitor = HealthMonitor::new(config(5), vec![backend.clone()], None).unwrap();
        (Arc::new(monitor), backend)
    }

    #[tokio::test]
    async fn test_probe_ok_marks_healthy_and_resets_counter() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let (monitor, backend) = monitor_for(&server.url());
        backend.mark_unhealthy();
        backend.record_failure();

        let result = monitor.probe(&backend).await;
        assert!(result.healthy);
        assert!(result.error.is_none());
        assert!(backend.is_healthy());
        assert_eq!(backend.consecutive_failures(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_200_marks_unhealthy_without_counting() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/health")
            .with_status(204)
            .create_async()
            .await;

        let (monitor, backend) = monitor_for(&server.url());

        let result = monitor.probe(&backend).await;
        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("HTTP 204 No Content"));
        assert!(!backend.is_healthy());
        assert_eq!(backend.consecutive_failures(), 0);
        assert_eq!(backend.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_probe_respects_backend_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/svc/health")
            .with_status(200)
            .create_async()
            .await;

        let (monitor, backend) = monitor_for(&format!("{}/svc", server.url()));
        assert!(monitor.probe(&backend).await.healthy);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_marks_unhealthy() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (monitor, backend) = monitor_for(&format!("http://{}", addr));
        let result = monitor.probe(&backend).await;
        assert!(!result.healthy);
        assert!(result.error.is_some());
        assert!(!backend.is_healthy());
    }

    #[tokio::test]
    async fn test_loop_updates_and_stops_on_shutdown() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/health")
            .with_status(503)
            .expect_at_least(1)
            .create_async()
            .await;

        let (monitor, backend) = monitor_for(&server.url());
        let handles = monitor.start();
        assert_eq!(handles.len(), 1);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!backend.is_healthy());

        monitor.shutdown();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("probe loop did not stop")
                .unwrap();
        }
    }
}
