// src/load_balancer/algorithm.rs
use crate::load_balancer::{LeastConnections, RoundRobin};
use crate::proxy::Backend;
use std::sync::Arc;

pub use crate::config::Algorithm;

/// Picks one backend out of a fixed, ordered list.
///
/// Implementations may update their own cursor state but never the list.
pub trait SelectBackend: Send + Sync {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;

    fn algorithm(&self) -> Algorithm;
}

/// The active selection strategy. Swapping the variant discards any cursor
/// state the previous one carried.
#[derive(Debug)]
pub enum Strategy {
    RoundRobin(RoundRobin),
    LeastConnections(LeastConnections),
}

impl Strategy {
    pub fn round_robin() -> Self {
        Strategy::RoundRobin(RoundRobin::new())
    }

    pub fn least_connections() -> Self {
        Strategy::LeastConnections(LeastConnections)
    }
}

impl From<Algorithm> for Strategy {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::RoundRobin => Strategy::round_robin(),
            Algorithm::LeastConnection => Strategy::least_connections(),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::round_robin()
    }
}

impl SelectBackend for Strategy {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        match self {
            Strategy::RoundRobin(rr) => rr.select(backends),
            Strategy::LeastConnections(lc) => lc.select(backends),
        }
    }

    fn algorithm(&self) -> Algorithm {
        match self {
            Strategy::RoundRobin(rr) => rr.algorithm(),
            Strategy::LeastConnections(lc) => lc.algorithm(),
        }
    }
}
