// src/load_balancer/mod.rs
mod algorithm;
mod balancer;
mod least_connections;
mod round_robin;

pub use algorithm::{Algorithm, SelectBackend, Strategy};
pub use balancer::Balancer;
pub use least_connections::LeastConnections;
pub use round_robin::RoundRobin;
