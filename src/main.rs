// src/main.rs
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use http_balancer::{
    admin::AdminHandler,
    config::{self, Config},
    health::HealthMonitor,
    load_balancer::{Balancer, Strategy},
    metrics::{start_metrics_server, MetricsRegistry},
    proxy::{Backend, Proxy},
    server::{RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("http_balancer=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    let metrics_registry = MetricsRegistry::new()?;
    let metrics = config.metrics.enabled.then(|| metrics_registry.collector());

    let backends = build_backends(&config);
    let balancer = Arc::new(Balancer::new(
        backends.clone(),
        Strategy::from(config.algorithm),
    ));
    info!(
        algorithm = %config.algorithm,
        "Balancing across {} backends ({} healthy)",
        backends.len(),
        balancer.healthy_count()
    );

    let monitor = Arc::new(HealthMonitor::new(
        config.health_check.clone(),
        backends,
        metrics.clone(),
    )?);
    let probe_loops = monitor.start();

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone())?;
    }

    let proxy = Arc::new(Proxy::new(balancer.clone(), &config.proxy, metrics.clone()));
    let admin = Arc::new(AdminHandler::new(balancer, config.admin.prefix.clone(), metrics));
    let handler = RequestHandler::new(proxy, admin);

    info!("Starting load balancer on {}", config.listen);
    ServerBuilder::new(config.listen)
        .with_handler(handler)
        .serve(shutdown_signal())
        .await?;

    monitor.shutdown();
    for probe_loop in probe_loops {
        if let Err(e) = probe_loop.await {
            warn!("Health probe task ended abnormally: {}", e);
        }
    }

    info!("Load balancer stopped");
    Ok(())
}

fn build_backends(config: &Config) -> Vec<Arc<Backend>> {
    config
        .backends
        .iter()
        .map(|b| {
            Arc::new(Backend::with_failure_threshold(
                b.url.clone(),
                config.failure_threshold,
            ))
        })
        .collect()
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
