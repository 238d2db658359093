//! Arrakis KV Router
//!
//! Serves a sharded cache over HTTP:
//! - Builds one connection pool per configured shard at startup
//! - Routes `/cache/{key}` requests to the shard owning the key
//! - Exposes health/ready endpoints for Kubernetes
//! - Exports Prometheus metrics for observability

use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info};

use arrakis_kv_router::config::{Backend, RouterConfig};
use arrakis_kv_router::health::AppState;
use arrakis_kv_router::metrics::RouterMetrics;
use arrakis_kv_router::{api, health, ShardPool, ShardedPool};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let router_config = RouterConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("arrakis_kv_router={}", router_config.log_level).parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        shards = router_config.servers.len(),
        backend = ?router_config.backend,
        "Starting Arrakis KV Router"
    );

    let metrics = RouterMetrics::install()?;
    info!("Prometheus metrics initialized");

    match router_config.backend {
        Backend::Tcp => {
            let registry = ShardedPool::connect_tcp(&router_config.servers, &router_config.pool)?;
            serve(registry, metrics, router_config.http_port).await
        }
        Backend::Memory => {
            info!("Memory backend configured - running in local mode");
            let registry = ShardedPool::in_memory(&router_config.servers)?;
            serve(registry, metrics, router_config.http_port).await
        }
    }
}

async fn serve<P: ShardPool>(registry: ShardedPool<P>, metrics: RouterMetrics, port: u16) -> Result<()> {
    let state = AppState {
        registry,
        metrics: Some(metrics),
    };

    let app = health::router(state.clone()).merge(api::router(state));
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    info!(port, "Starting HTTP server");

    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, app);

    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Router shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
