// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::sync::Arc;
use tower::Service;

use crate::admin::AdminHandler;
use crate::proxy::Proxy;

/// Sends admin-prefixed paths to the control surface, everything else to the
/// proxy.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<Proxy>,
    admin: Arc<AdminHandler>,
}

impl RequestHandler {
    pub fn new(proxy: Arc<Proxy>, admin: Arc<AdminHandler>) -> Self {
        Self { proxy, admin }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if self.admin.matches(req.uri().path()) {
            let response = self.admin.handle(&req);
            return Box::pin(async move { Ok::<_, Self::Error>(response) });
        }

        let proxy = self.proxy.clone();
        Box::pin(async move { Ok::<_, Self::Error>(proxy.handle(req).await) })
    }
}
