use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use steadfast_core::{DependencyRegistry, DependencyStatus};

use crate::error::{ApiError, ApiResult};

/// GET /dependencies
pub async fn list(State(registry): State<Arc<DependencyRegistry>>) -> Json<Vec<DependencyStatus>> {
    Json(registry.snapshot())
}

/// GET /dependencies/:name
pub async fn get(
    State(registry): State<Arc<DependencyRegistry>>,
    Path(name): Path<String>,
) -> ApiResult<Json<DependencyStatus>> {
    find(&registry, &name).map(Json)
}

/// POST /dependencies/:name/reset
///
/// Forces the dependency's breaker back to closed.
pub async fn reset(
    State(registry): State<Arc<DependencyRegistry>>,
    Path(name): Path<String>,
) -> ApiResult<Json<DependencyStatus>> {
    let status = find(&registry, &name)?;
    if status.circuit_breaker.is_none() {
        return Err(ApiError::BadRequest(format!(
            "Dependency '{name}' has no circuit breaker"
        )));
    }

    registry.circuit_breaker(&name).reset();

    find(&registry, &name).map(Json)
}

fn find(registry: &DependencyRegistry, name: &str) -> ApiResult<DependencyStatus> {
    registry
        .snapshot()
        .into_iter()
        .find(|status| status.name == name)
        .ok_or_else(|| ApiError::NotFound(format!("Dependency '{name}' not found")))
}
