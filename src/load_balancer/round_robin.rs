// src/load_balancer/round_robin.rs
use crate::load_balancer::{Algorithm, SelectBackend};
use crate::proxy::Backend;
use std::sync::{Arc, Mutex, PoisonError};

/// Walks the backend ring, skipping unhealthy entries.
///
/// The cursor lock is held for the whole scan so concurrent callers never
/// skip or repeat a position.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<usize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn starting_at(position: usize) -> Self {
        Self {
            cursor: Mutex::new(position),
        }
    }
}

impl SelectBackend for RoundRobin {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let len = backends.len();
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let start = *cursor % len;
        let mut position = start;

        loop {
            let backend = &backends[position];
            // The cursor moves before the health check, even for a skipped entry.
            position = (position + 1) % len;
            *cursor = position;

            if backend.is_healthy() {
                return Some(backend.clone());
            }
            if position == start {
                return None;
            }
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::RoundRobin
    }
}
