// src/proxy/backend.rs
use crate::metrics::MetricsCollector;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use url::Url;

/// Consecutive request failures after which a backend is taken out of rotation.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

#[derive(Debug)]
struct HealthState {
    healthy: bool,
    consecutive_failures: u32,
}

/// Health and load record for one upstream target.
///
/// `healthy` has two writers: the probe loop (`mark_healthy`/`mark_unhealthy`)
/// and the request-outcome path (`record_failure`). They are not ordered with
/// respect to each other, so whichever lands last wins. A probe that succeeds
/// right after the failure threshold tripped puts the backend straight back in
/// rotation, and a failed probe can take it out with the counter at zero.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,
    failure_threshold: u32,

    health: RwLock<HealthState>,
    active_connections: AtomicUsize,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        Self::with_failure_threshold(url, DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_failure_threshold(url: Url, failure_threshold: u32) -> Self {
        // The path prefix is part of the identity: two services may share an
        // authority.
        let id = format!(
            "{}:{}{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80),
            url.path().trim_end_matches('/')
        );

        Self {
            id,
            url,
            failure_threshold,
            health: RwLock::new(HealthState {
                healthy: true,
                consecutive_failures: 0,
            }),
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Build an absolute URL on this backend: scheme and authority come from
    /// the backend, its own path prefix is prepended to `path_and_query`.
    pub fn endpoint(&self, path_and_query: &str) -> String {
        let mut target = format!("{}://{}", self.url.scheme(), self.authority());
        target.push_str(self.url.path().trim_end_matches('/'));
        if !path_and_query.starts_with('/') {
            target.push('/');
        }
        target.push_str(path_and_query);
        target
    }

    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or("unknown");
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    fn read_health(&self) -> RwLockReadGuard<'_, HealthState> {
        self.health.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_health(&self) -> RwLockWriteGuard<'_, HealthState> {
        self.health.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_healthy(&self) -> bool {
        self.read_health().healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.read_health().consecutive_failures
    }

    /// Probe succeeded. Returns the previous health flag.
    pub fn mark_healthy(&self) -> bool {
        let mut health = self.write_health();
        let was_healthy = health.healthy;
        health.healthy = true;
        health.consecutive_failures = 0;
        was_healthy
    }

    /// Probe failed. The failure counter is left alone. Returns the previous
    /// health flag.
    pub fn mark_unhealthy(&self) -> bool {
        let mut health = self.write_health();
        let was_healthy = health.healthy;
        health.healthy = false;
        was_healthy
    }

    /// A forwarded request failed. Returns true when this call took the backend
    /// out of rotation.
    pub fn record_failure(&self) -> bool {
        let mut health = self.write_health();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        if health.consecutive_failures >= self.failure_threshold {
            let was_healthy = health.healthy;
            health.healthy = false;
            was_healthy
        } else {
            false
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn increment_active(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement_active(&self) {
        let result = self.active_connections.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |current| current.checked_sub(1),
        );
        if result.is_err() {
            tracing::error!(backend = %self.id, "unbalanced decrement of active connections");
        }
    }

    /// Count a dispatched request against this backend until the guard drops.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.track_connection_reported(None)
    }

    /// Like `track_connection`, but every change of the count is also written
    /// to the active-connections gauge.
    pub fn track_connection_reported(
        self: &Arc<Self>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> ConnectionGuard {
        self.increment_active();
        let guard = ConnectionGuard {
            backend: self.clone(),
            metrics,
        };
        guard.report();
        guard
    }
}

/// Holds one active connection on a backend; released on drop.
pub struct ConnectionGuard {
    backend: Arc<Backend>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ConnectionGuard {
    fn report(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_connections(&self.backend.id, self.backend.active_connections());
        }
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("backend", &self.backend.id)
            .finish()
    }
}

impl Deref for ConnectionGuard {
    type Target = Backend;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.decrement_active();
        self.report();
    }
}
