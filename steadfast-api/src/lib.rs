//! HTTP surface of the resilience control plane.
//!
//! Provides the shutdown-aware admission middleware, health probes, the
//! Prometheus scrape endpoint and a read-mostly view of the dependency
//! registry.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod signal;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use steadfast_core::{DependencyRegistry, ShutdownCoordinator};

pub use error::{ApiError, ApiResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub coordinator: Arc<ShutdownCoordinator>,
    pub registry: Arc<DependencyRegistry>,
}

impl AppState {
    pub fn new(coordinator: Arc<ShutdownCoordinator>, registry: Arc<DependencyRegistry>) -> Self {
        Self {
            coordinator,
            registry,
        }
    }
}

/// Routes nested under `/api/v1`.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/dependencies", get(handlers::dependencies::list))
        .route("/dependencies/:name", get(handlers::dependencies::get))
        .route(
            "/dependencies/:name/reset",
            post(handlers::dependencies::reset),
        )
        .with_state(state)
}

/// Probe and scrape endpoints served at the root.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(observability::liveness_handler))
        .route("/health/ready", get(observability::readiness_handler))
        .route("/metrics", get(observability::metrics_handler))
        .with_state(state)
}

/// Full application router.
///
/// Probes stay reachable while draining; everything under `/api/v1` is
/// admitted through the shutdown middleware.
pub fn app(state: AppState) -> Router {
    let api = routes(state.clone()).layer(from_fn_with_state(
        Arc::clone(&state.coordinator),
        middleware::shutdown_middleware,
    ));

    Router::new()
        .merge(health_routes(state))
        .nest("/api/v1", api)
}
