//! Liveness and readiness probes.
//!
//! Readiness follows the shutdown phase: an instance that has started draining
//! reports `503` so load balancers stop routing new traffic to it.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use steadfast_core::{ShutdownCoordinator, ShutdownPhase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub phase: ShutdownPhase,
    pub active_requests: i64,
}

/// Liveness probe
///
/// GET /health
pub async fn liveness_handler(
    State(coordinator): State<Arc<ShutdownCoordinator>>,
) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        phase: coordinator.phase(),
        active_requests: coordinator.active_count(),
    })
}

/// Readiness probe
///
/// GET /health/ready
pub async fn readiness_handler(
    State(coordinator): State<Arc<ShutdownCoordinator>>,
) -> impl IntoResponse {
    let phase = coordinator.phase();
    let (status_code, status) = match phase {
        ShutdownPhase::Running => (StatusCode::OK, "ready"),
        ShutdownPhase::Draining | ShutdownPhase::Stopped => {
            (StatusCode::SERVICE_UNAVAILABLE, "draining")
        }
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            phase,
            active_requests: coordinator.active_count(),
        }),
    )
}
