use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use steadfast_api::{
    observability::{init_logging, init_metrics, PrometheusSink},
    signal::shutdown_signal,
    AppState,
};
use steadfast_core::{DependencyRegistry, DrainError, ShutdownCoordinator};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod config;

use config::GatewayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::load()?;

    init_logging(&config.log).map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
    init_metrics()?;

    info!("Starting Steadfast gateway");

    let coordinator = Arc::new(ShutdownCoordinator::try_new(
        config.resilience.shutdown.clone(),
    )?);
    let registry = Arc::new(build_registry(&config)?);
    info!(dependencies = ?registry.names(), "Dependency registry initialized");

    let state = AppState::new(Arc::clone(&coordinator), registry);
    let app = steadfast_api::app(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let stop = CancellationToken::new();
    let drain = tokio::spawn(drain_on_signal(Arc::clone(&coordinator), stop.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await?;

    drain.await?;
    info!("Server stopped");

    Ok(())
}

fn build_registry(config: &GatewayConfig) -> Result<DependencyRegistry> {
    let registry =
        DependencyRegistry::try_new(config.resilience.clone())?.with_sink(Arc::new(PrometheusSink));

    for (name, overrides) in &config.dependencies {
        match &overrides.circuit_breaker {
            Some(breaker) => {
                registry.register_circuit_breaker(name, breaker.clone())?;
            }
            None => {
                registry.circuit_breaker(name);
            }
        }
        match &overrides.bulkhead {
            Some(bulkhead) => {
                registry.register_bulkhead(name, bulkhead.clone())?;
            }
            None => {
                registry.bulkhead(name);
            }
        }
        match &overrides.retry {
            Some(policy) => {
                registry.register_retrier(name, policy.clone())?;
            }
            None => {
                registry.retrier(name);
            }
        }
    }

    Ok(registry)
}

/// Waits for a termination signal, drains in-flight requests, then stops the
/// listener. The listener keeps answering `503` until the drain ends.
///
/// A second signal abandons the drain.
async fn drain_on_signal(coordinator: Arc<ShutdownCoordinator>, stop: CancellationToken) {
    shutdown_signal().await;
    coordinator.initiate_shutdown();

    let abandon = CancellationToken::new();
    let second_signal = tokio::spawn({
        let abandon = abandon.clone();
        async move {
            shutdown_signal().await;
            warn!("Second signal received, abandoning drain");
            abandon.cancel();
        }
    });

    match coordinator.wait_for_drain(&abandon).await {
        Ok(()) => info!("All in-flight requests drained"),
        Err(DrainError::Timeout { waited, active }) => {
            warn!(?waited, active, "Drain period elapsed with requests still active");
        }
        Err(DrainError::Cancelled { active }) => {
            warn!(active, "Drain abandoned with requests still active");
        }
    }

    second_signal.abort();
    stop.cancel();
}
