use std::fmt::Display;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use steadfast_core::{Rejection, ResilienceError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Service is shutting down")]
    ShuttingDown { retry_after: u64 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ShuttingDown { .. } | ApiError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        ApiError::Unavailable(rejection.to_string())
    }
}

impl<E: Display> From<ResilienceError<E>> for ApiError {
    fn from(err: ResilienceError<E>) -> Self {
        match err {
            ResilienceError::CircuitOpen { name } => {
                ApiError::from(Rejection::CircuitOpen { name })
            }
            ResilienceError::BulkheadFull { name } => {
                ApiError::from(Rejection::BulkheadFull { name })
            }
            ResilienceError::Cancelled => ApiError::Unavailable("operation cancelled".to_string()),
            ResilienceError::MaxRetriesExceeded { attempts, source } => {
                ApiError::Upstream(format!("{source} (after {attempts} attempts)"))
            }
            ResilienceError::Operation(e) => ApiError::Upstream(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, details, retry_after) = match &self {
            ApiError::ShuttingDown { retry_after } => (
                "Service unavailable",
                Some("server is shutting down".to_string()),
                Some(*retry_after),
            ),
            ApiError::Unavailable(msg) => ("Service unavailable", Some(msg.clone()), None),
            ApiError::Upstream(msg) => {
                tracing::warn!("Upstream failure: {}", msg);
                ("Upstream failure", Some(msg.clone()), None)
            }
            ApiError::NotFound(msg) => ("Resource not found", Some(msg.clone()), None),
            ApiError::BadRequest(msg) => ("Bad request", Some(msg.clone()), None),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                ("Internal server error", None, None)
            }
        };

        let mut response_json = json!({
            "error": message,
        });

        if let Some(details_msg) = details {
            response_json["details"] = json!(details_msg);
        }
        if let Some(secs) = retry_after {
            response_json["retry_after"] = json!(secs);
        }

        let mut response = (status, Json(response_json)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
