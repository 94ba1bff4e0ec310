// src/metrics/server.rs
use super::MetricsRegistry;
use anyhow::Result;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Serve the Prometheus text format on `addr` at `path` in a background task.
pub fn start_metrics_server(addr: SocketAddr, registry: MetricsRegistry, path: String) -> Result<()> {
    let registry = Arc::new(registry);
    let path = Arc::new(path);
    let service_path = path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move { Ok::<_, Infallible>(metrics_response(&req, &registry, &path)) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("Metrics server listening on http://{}{}", addr, path);

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

fn metrics_response(req: &Request<Body>, registry: &MetricsRegistry, path: &str) -> Response<Body> {
    if req.uri().path() != path {
        return text_response(StatusCode::NOT_FOUND, Body::from("Not Found"));
    }

    match registry.gather() {
        Ok(metrics) => {
            let mut response = text_response(StatusCode::OK, Body::from(metrics));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => {
            error!(%e, "failed to encode metrics");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, Body::empty())
        }
    }
}

fn text_response(status: StatusCode, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_only_configured_path() {
        let registry = MetricsRegistry::new().unwrap();
        registry.collector().record_no_backend();

        let req = Request::get("/metrics").body(Body::empty()).unwrap();
        let resp = metrics_response(&req, &registry, "/metrics");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("lb_no_backend_total 1"));

        let req = Request::get("/other").body(Body::empty()).unwrap();
        let resp = metrics_response(&req, &registry, "/metrics");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
