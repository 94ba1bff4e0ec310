// src/load_balancer/balancer.rs
use crate::load_balancer::{Algorithm, SelectBackend, Strategy};
use crate::proxy::Backend;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Owns the fixed backend list and the active selection strategy.
pub struct Balancer {
    backends: Vec<Arc<Backend>>,
    strategy: Mutex<Strategy>,
}

impl Balancer {
    pub fn new(backends: Vec<Arc<Backend>>, strategy: Strategy) -> Self {
        Self {
            backends,
            strategy: Mutex::new(strategy),
        }
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    fn strategy(&self) -> MutexGuard<'_, Strategy> {
        self.strategy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the active strategy for a backend. Never touches connection counts
    /// or health state.
    pub fn select_backend(&self) -> Option<Arc<Backend>> {
        self.strategy().select(&self.backends)
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        let algorithm = strategy.algorithm();
        *self.strategy() = strategy;
        info!(%algorithm, "changed the load balancing algorithm");
    }

    pub fn set_algorithm(&self, algorithm: Algorithm) {
        self.set_strategy(Strategy::from(algorithm));
    }

    pub fn algorithm(&self) -> Algorithm {
        self.strategy().algorithm()
    }

    /// Request-path half of the health signal. Success leaves health alone;
    /// only the probe loop brings a backend back.
    pub fn report_outcome(&self, backend: &Backend, succeeded: bool) {
        if succeeded {
            return;
        }
        if backend.record_failure() {
            warn!(
                backend = %backend.id,
                failures = backend.consecutive_failures(),
                "backend marked unhealthy after consecutive request failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer(n: u16, strategy: Strategy) -> Balancer {
        let backends = (0..n)
            .map(|i| {
                Arc::new(Backend::new(
                    format!("http://127.0.0.1:{}", 8001 + i).parse().unwrap(),
                ))
            })
            .collect();
        Balancer::new(backends, strategy)
    }

    #[test]
    fn test_defaults_to_round_robin() {
        let lb = balancer(2, Strategy::default());
        assert_eq!(lb.algorithm(), Algorithm::RoundRobin);

        let ids: Vec<_> = (0..4).map(|_| lb.select_backend().unwrap().id.clone()).collect();
        assert_eq!(ids, ["127.0.0.1:8001", "127.0.0.1:8002", "127.0.0.1:8001", "127.0.0.1:8002"]);
    }

    #[test]
    fn test_strategy_swap_is_immediate() {
        let lb = balancer(3, Strategy::round_robin());
        lb.backends()[0].increment_active();
        lb.backends()[0].increment_active();
        lb.backends()[1].increment_active();

        // Round robin ignores load.
        assert_eq!(lb.select_backend().unwrap().id, lb.backends()[0].id);

        lb.set_algorithm(Algorithm::LeastConnection);
        assert_eq!(lb.algorithm(), Algorithm::LeastConnection);
        assert_eq!(lb.select_backend().unwrap().id, lb.backends()[2].id);
        assert_eq!(lb.select_backend().unwrap().id, lb.backends()[2].id);
    }

    #[test]
    fn test_swap_resets_cursor() {
        let lb = balancer(3, Strategy::round_robin());
        lb.select_backend();
        lb.select_backend();

        lb.set_strategy(Strategy::round_robin());
        assert_eq!(lb.select_backend().unwrap().id, lb.backends()[0].id);
    }

    #[test]
    fn test_report_outcome() {
        let lb = balancer(2, Strategy::round_robin());
        let backend = lb.backends()[0].clone();

        for _ in 0..10 {
            lb.report_outcome(&backend, true);
        }
        assert_eq!(backend.consecutive_failures(), 0);

        for _ in 0..4 {
            lb.report_outcome(&backend, false);
        }
        assert!(backend.is_healthy());
        lb.report_outcome(&backend, false);
        assert!(!backend.is_healthy());
        assert_eq!(lb.healthy_count(), 1);

        // Success does not bring it back.
        lb.report_outcome(&backend, true);
        assert!(!backend.is_healthy());

        assert_eq!(lb.select_backend().unwrap().id, lb.backends()[1].id);
        assert_eq!(lb.select_backend().unwrap().id, lb.backends()[1].id);
    }

    #[test]
    fn test_no_backend_available() {
        let lb = balancer(2, Strategy::least_connections());
        for b in lb.backends() {
            b.mark_unhealthy();
        }
        assert!(lb.select_backend().is_none());
        assert_eq!(lb.healthy_count(), 0);
    }
}
