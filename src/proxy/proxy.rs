// ────────────────────────────────
// src/proxy/proxy.rs
// Forwards requests to the backend chosen by the balancer and reports the
// outcome back into it.
// ────────────────────────────────

use super::{Backend, ConnectionGuard, RequestContext};
use crate::config::ProxyConfig;
use crate::load_balancer::Balancer;
use crate::metrics::MetricsCollector;
use futures::StreamExt;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Address of the client connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr(pub SocketAddr);

pub struct Proxy {
    balancer: Arc<Balancer>,
    client: Client<HttpsConnector<HttpConnector>, Body>,
    request_timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        balancer: Arc<Balancer>,
        config: &ProxyConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build::<_, Body>(HttpsConnector::new());

        Self {
            balancer,
            client,
            request_timeout: config.request_timeout(),
            metrics,
        }
    }

    /// Forward one request. Failures are turned into 502 responses here and
    /// never escape to the connection.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let mut ctx = RequestContext::new();
        match self.forward(req, &mut ctx).await {
            Ok(response) => response,
            Err(err) => self.on_error(&ctx, err),
        }
    }

    async fn forward(
        &self,
        mut req: Request<Body>,
        ctx: &mut RequestContext,
    ) -> Result<Response<Body>, ProxyError> {
        let backend = self
            .balancer
            .select_backend()
            .ok_or(ProxyError::NoHealthyBackend)?;
        ctx.backend = Some(backend.clone());

        let guard = backend.track_connection_reported(self.metrics.clone());

        prepare_request(&mut req, &backend, ctx)?;
        debug!(request_id = %ctx.id, backend = %backend.id, uri = %req.uri(), "forwarding request");

        match timeout(self.request_timeout, self.client.request(req)).await {
            Ok(Ok(response)) => Ok(self.on_response(ctx, &backend, response, guard)),
            Ok(Err(e)) => Err(ProxyError::Dispatch(e)),
            Err(_) => Err(ProxyError::Timeout(self.request_timeout)),
        }
    }

    fn on_response(
        &self,
        ctx: &RequestContext,
        backend: &Backend,
        response: Response<Body>,
        guard: ConnectionGuard,
    ) -> Response<Body> {
        let status = response.status();
        // 5xx is relayed as-is but still counts against the backend.
        let succeeded = !status.is_server_error();
        if succeeded {
            self.balancer.report_outcome(backend, true);
        } else {
            self.report_failure(backend);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_request(&backend.id, succeeded, ctx.elapsed());
        }

        if succeeded {
            debug!(
                request_id = %ctx.id,
                backend = %backend.id,
                status = status.as_u16(),
                elapsed_ms = ctx.elapsed().as_millis() as u64,
                "request to {} succeeded",
                backend.url
            );
        } else {
            warn!(
                request_id = %ctx.id,
                backend = %backend.id,
                status = status.as_u16(),
                failures = backend.consecutive_failures(),
                "backend answered with a server error"
            );
        }

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        // The connection stays counted until the body has been streamed out.
        let body = Body::wrap_stream(body.map(move |chunk| {
            let _held = &guard;
            chunk
        }));
        Response::from_parts(parts, body)
    }

    fn on_error(&self, ctx: &RequestContext, err: ProxyError) -> Response<Body> {
        match &err {
            ProxyError::NoHealthyBackend => {
                warn!(request_id = %ctx.id, "no healthy backend available");
                if let Some(metrics) = &self.metrics {
                    metrics.record_no_backend();
                }
            }
            ProxyError::Dispatch(_) | ProxyError::Timeout(_) => {
                if let Some(backend) = &ctx.backend {
                    self.report_failure(backend);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_request(&backend.id, false, ctx.elapsed());
                    }
                }
                warn!(request_id = %ctx.id, backend = %ctx.backend_id(), %err, "backend request failed");
            }
            ProxyError::InvalidTarget(_) => {
                error!(request_id = %ctx.id, backend = %ctx.backend_id(), %err, "could not build upstream request");
            }
        }
        Response::from(err)
    }

    /// Count a failed dispatch and publish the health change right away
    /// instead of waiting for the next probe.
    fn report_failure(&self, backend: &Backend) {
        self.balancer.report_outcome(backend, false);
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, backend.is_healthy());
            metrics.update_healthy_backends(self.balancer.healthy_count());
        }
    }
}

fn prepare_request(
    req: &mut Request<Body>,
    backend: &Backend,
    ctx: &RequestContext,
) -> Result<(), ProxyError> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    let target: Uri = backend
        .endpoint(&path_and_query)
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::InvalidTarget(e.to_string()))?;
    *req.uri_mut() = target;

    let peer = req.extensions().get::<PeerAddr>().copied();
    let headers = req.headers_mut();
    strip_hop_by_hop(headers);

    headers.insert(HOST, header_value(&backend.authority())?);
    headers.insert("x-request-id", header_value(&ctx.id.to_string())?);

    if let Some(PeerAddr(addr)) = peer {
        let forwarded = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, addr.ip()),
            None => addr.ip().to_string(),
        };
        headers.insert("x-forwarded-for", header_value(&forwarded)?);
    }

    Ok(())
}

fn header_value(value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value).map_err(|e| ProxyError::InvalidTarget(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackend,

    #[error("Backend error: {0}")]
    Dispatch(#[from] hyper::Error),

    #[error("Backend request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid upstream target: {0}")]
    InvalidTarget(String),
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match err {
            ProxyError::NoHealthyBackend => "no healthy backend available",
            ProxyError::Dispatch(_) | ProxyError::Timeout(_) | ProxyError::InvalidTarget(_) => {
                "Bad Gateway"
            }
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = StatusCode::BAD_GATEWAY;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[test]
    fn test_prepare_request_rewrites_target() {
        let backend = Backend::new("http://10.0.0.7:9000/api".parse().unwrap());
        let ctx = RequestContext::new();
        let mut req = Request::get("http://lb.local/users/7?expand=true")
            .header(HOST, "lb.local")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(PeerAddr("192.0.2.1:50000".parse().unwrap()));

        prepare_request(&mut req, &backend, &ctx).unwrap();

        assert_eq!(req.uri(), "http://10.0.0.7:9000/api/users/7?expand=true");
        assert_eq!(req.headers()[HOST], "10.0.0.7:9000");
        assert_eq!(req.headers()["x-forwarded-for"], "203.0.113.9, 192.0.2.1");
        assert_eq!(req.headers()["x-request-id"], ctx.id.to_string().as_str());
    }

    #[tokio::test]
    async fn test_error_responses() {
        let resp = Response::from(ProxyError::NoHealthyBackend);
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"no healthy backend available");

        let resp = Response::from(ProxyError::Timeout(Duration::from_secs(1)));
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"Bad Gateway");
    }
}
