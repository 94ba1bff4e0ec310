// src/metrics/collector.rs
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use anyhow::Result;

use crate::config::Algorithm;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub no_backend_total: IntCounter,

    // Backend metrics
    pub backend_connections_active: IntGaugeVec,
    pub backend_health_status: IntGaugeVec,
    pub healthy_backends: IntGauge,

    // Control plane
    pub strategy_changes_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Forwarded requests by backend and outcome"),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Time until the backend response head arrived",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let no_backend_total = IntCounter::new(
            "lb_no_backend_total",
            "Requests rejected because no healthy backend was available",
        )?;
        registry.register(Box::new(no_backend_total.clone()))?;

        let backend_connections_active = IntGaugeVec::new(
            Opts::new("lb_backend_connections_active", "Active backend connections"),
            &["backend"],
        )?;
        registry.register(Box::new(backend_connections_active.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let strategy_changes_total = IntCounterVec::new(
            Opts::new("lb_strategy_changes_total", "Strategy swaps by new algorithm"),
            &["algorithm"],
        )?;
        registry.register(Box::new(strategy_changes_total.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            no_backend_total,
            backend_connections_active,
            backend_health_status,
            healthy_backends,
            strategy_changes_total,
        })
    }

    pub fn record_request(&self, backend: &str, success: bool, duration: std::time::Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.requests_total
            .with_label_values(&[backend, outcome])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_no_backend(&self) {
        self.no_backend_total.inc();
    }

    pub fn update_backend_connections(&self, backend: &str, count: usize) {
        self.backend_connections_active
            .with_label_values(&[backend])
            .set(count as i64);
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        self.backend_health_status
            .with_label_values(&[backend])
            .set(i64::from(healthy));
    }

    pub fn update_healthy_backends(&self, healthy: usize) {
        self.healthy_backends.set(healthy as i64);
    }

    pub fn record_strategy_change(&self, algorithm: Algorithm) {
        self.strategy_changes_total
            .with_label_values(&[algorithm.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_exposes_recorded_values() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_request("127.0.0.1:8001", true, std::time::Duration::from_millis(12));
        metrics.record_request("127.0.0.1:8001", false, std::time::Duration::from_millis(3));
        metrics.record_no_backend();
        metrics.update_backend_health("127.0.0.1:8001", false);
        metrics.record_strategy_change(Algorithm::LeastConnection);

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains(r#"lb_requests_total{backend="127.0.0.1:8001",outcome="success"} 1"#));
        assert!(text.contains(r#"lb_requests_total{backend="127.0.0.1:8001",outcome="failure"} 1"#));
        assert!(text.contains("lb_no_backend_total 1"));
        assert!(text.contains(r#"lb_backend_health_status{backend="127.0.0.1:8001"} 0"#));
        assert!(text.contains(r#"lb_strategy_changes_total{algorithm="least-connection"} 1"#));
    }
}
