// src/load_balancer/least_connections.rs
use crate::load_balancer::{Algorithm, SelectBackend};
use crate::proxy::Backend;
use std::sync::Arc;

/// Picks the healthy backend with the fewest active connections; the first
/// one in list order wins a tie.
///
/// Counts are read one backend at a time without locking the set, so the
/// winner's count may already have moved by the time the request is sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastConnections;

impl SelectBackend for LeastConnections {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut best: Option<(&Arc<Backend>, usize)> = None;

        for backend in backends {
            if !backend.is_healthy() {
                continue;
            }
            let active = backend.active_connections();
            match best {
                Some((_, min)) if active >= min => {}
                _ => best = Some((backend, active)),
            }
        }

        best.map(|(backend, _)| backend.clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::LeastConnection
    }
}
