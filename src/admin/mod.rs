// src/admin/mod.rs
//! Control surface mounted under the admin prefix.
//!
//! `POST {prefix}/change-algorithm?algorithm=round-robin|least-connection`
//! swaps the balancer's strategy. Anything else under the prefix is a 404.
//! A root prefix (`/`) claims only the `/change-algorithm` route itself, so
//! the rest of the path space keeps going to the backends.

use crate::config::{Algorithm, ConfigError};
use crate::load_balancer::Balancer;
use crate::metrics::MetricsCollector;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::warn;

const CHANGE_ALGORITHM: &str = "/change-algorithm";

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("missing 'algorithm' query parameter")]
    MissingAlgorithm,

    #[error(transparent)]
    UnknownAlgorithm(#[from] ConfigError),
}

pub struct AdminHandler {
    balancer: Arc<Balancer>,
    prefix: String,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AdminHandler {
    pub fn new(
        balancer: Arc<Balancer>,
        prefix: impl Into<String>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            balancer,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            metrics,
        }
    }

    /// True when `path` belongs to the admin surface.
    pub fn matches(&self, path: &str) -> bool {
        if self.prefix.is_empty() {
            return path == CHANGE_ALGORITHM;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    pub fn handle(&self, req: &Request<Body>) -> Response<Body> {
        let route = req.uri().path().strip_prefix(self.prefix.as_str());
        if req.method() != Method::POST || route != Some(CHANGE_ALGORITHM) {
            return status(StatusCode::NOT_FOUND);
        }

        match parse_algorithm(req.uri().query()) {
            Ok(algorithm) => {
                self.balancer.set_algorithm(algorithm);
                if let Some(metrics) = &self.metrics {
                    metrics.record_strategy_change(algorithm);
                }
                status(StatusCode::OK)
            }
            Err(e) => {
                warn!(%e, "rejected algorithm change");
                status(StatusCode::BAD_REQUEST)
            }
        }
    }
}

fn parse_algorithm(query: Option<&str>) -> Result<Algorithm, AdminError> {
    let value = query
        .into_iter()
        .flat_map(|q| url::form_urlencoded::parse(q.as_bytes()))
        .find(|(key, _)| key == "algorithm")
        .map(|(_, value)| value.into_owned())
        .ok_or(AdminError::MissingAlgorithm)?;

    Ok(value.parse::<Algorithm>()?)
}

fn status(code: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    response
}
