//! Request admission middleware.
//!
//! Every inbound request is tracked by the process [`ShutdownCoordinator`].
//! Once draining has started, new requests are turned away with
//! `503 Service Unavailable` and a `Retry-After` hint while requests already
//! admitted run to completion.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use steadfast_core::ShutdownCoordinator;
use tracing::debug;

use crate::error::ApiError;
use crate::observability::metrics::InFlightGuard;

/// Tracks the request for the drain, or rejects it once draining has started.
pub async fn shutdown_middleware(
    State(coordinator): State<Arc<ShutdownCoordinator>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(_tracked) = coordinator.try_track() else {
        debug!(
            method = %request.method(),
            path = %request.uri().path(),
            "Rejecting request while draining"
        );
        return ApiError::ShuttingDown {
            retry_after: coordinator.retry_after().as_secs(),
        }
        .into_response();
    };

    let _in_flight = InFlightGuard::start();
    next.run(request).await
}
