// src/proxy/context.rs
use super::Backend;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Per-request state threaded explicitly through the forwarding hooks.
#[derive(Debug)]
pub struct RequestContext {
    pub id: Uuid,
    pub started: Instant,
    pub backend: Option<Arc<Backend>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            backend: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn backend_id(&self) -> &str {
        self.backend.as_deref().map_or("none", |b| b.id.as_str())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
